// Copyright 2025 The kmesh Authors
//
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

//! Server lifecycle: bind the processor together with the standard gRPC
//! health service, serve until SIGINT/SIGTERM, then drain in-flight
//! streams within a grace period.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use extproc_api::envoy::service::ext_proc::v3::external_processor_server::ExternalProcessorServer;
use thiserror::Error;
use tonic::transport::Server;
use tracing::{debug, info, warn};

use crate::service::ExtProcService;

/// Default gRPC listen port.
pub const DEFAULT_PORT: u16 = 50051;
/// Default drain window after a shutdown signal.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

type ShutdownCallback = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("transport failure: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

/// Listen address and drain behavior.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub grace_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { port: DEFAULT_PORT, grace_period: DEFAULT_GRACE_PERIOD }
    }
}

/// Hosts one [`ExtProcService`] plus the `grpc.health.v1.Health` service,
/// which reports SERVING as soon as the listener is up.
pub struct ExtProcServer {
    service: ExtProcService,
    config: ServerConfig,
    shutdown_callbacks: Vec<ShutdownCallback>,
}

impl ExtProcServer {
    pub fn new(service: ExtProcService) -> Self {
        ExtProcServer { service, config: ServerConfig::default(), shutdown_callbacks: Vec::new() }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.config.grace_period = grace_period;
        self
    }

    /// Registers a callback to run once a shutdown signal arrives, before
    /// the final stop. Callbacks run in registration order.
    pub fn on_shutdown<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shutdown_callbacks.push(Box::new(move || Box::pin(callback())));
        self
    }

    /// Serves until SIGINT or SIGTERM, then drains within the grace
    /// period. Streams still open when it elapses are dropped.
    pub async fn serve(self) -> Result<(), ServeError> {
        let ExtProcServer { service, config, shutdown_callbacks } = self;
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let name = service.name().to_owned();

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter.set_serving::<ExternalProcessorServer<ExtProcService>>().await;

        let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
        let server = Server::builder()
            .add_service(health_service)
            .add_service(ExternalProcessorServer::new(service))
            .serve_with_shutdown(addr, async {
                let _ = drain_rx.await;
            });
        tokio::pin!(server);

        info!(target: "ext_proc", processor = %name, %addr, "external processor listening");
        tokio::select! {
            result = &mut server => {
                // Listener failed before any signal arrived.
                result?;
            },
            signal = shutdown_signal() => {
                signal?;
                for callback in shutdown_callbacks {
                    callback().await;
                }
                let _ = drain_tx.send(());
                debug!(target: "ext_proc", processor = %name, grace = ?config.grace_period, "draining in-flight streams");
                match tokio::time::timeout(config.grace_period, &mut server).await {
                    Ok(result) => result?,
                    Err(_) => {
                        warn!(target: "ext_proc", processor = %name, "grace period elapsed with streams still open, stopping");
                    },
                }
            },
        }
        info!(target: "ext_proc", processor = %name, "external processor stopped");
        Ok(())
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!(target: "ext_proc", "received SIGINT"),
        _ = sigterm.recv() => info!(target: "ext_proc", "received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!(target: "ext_proc", "received ctrl-c");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_contract() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 50051);
        assert_eq!(config.grace_period, Duration::from_secs(5));
    }

    #[test]
    fn builder_overrides_apply() {
        let server = ExtProcServer::new(ExtProcService::new("x"))
            .port(9000)
            .grace_period(Duration::from_secs(1));
        assert_eq!(server.config.port, 9000);
        assert_eq!(server.config.grace_period, Duration::from_secs(1));
    }
}
