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

use std::time::Duration;

use clap::{Parser, ValueEnum};
use extproc_sdk::{ExtProcServer, ExtProcService, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod processors;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Processor {
    /// Continue every phase unchanged.
    Noop,
    /// Echo the request id as `x-extra-request-id` on both sides.
    Trivial,
    /// Stamp a SHA-256 request digest on request and response.
    Digest,
    /// Answer every request directly with an echo.
    Echo,
}

#[derive(Debug, Parser)]
#[command(about = "Serve an Envoy external processor")]
struct Args {
    /// Built-in processor to serve.
    #[arg(short, long, value_enum, default_value = "noop")]
    service: Processor,

    /// gRPC listen port.
    #[arg(short, long, env = "GRPC_PORT", default_value_t = extproc_sdk::DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for in-flight streams on shutdown.
    #[arg(short, long, env = "SHUTDOWN_GRACE_PERIOD", default_value_t = 5)]
    grace_period: u64,

    /// Log filter, e.g. `info` or `info,ext_proc=debug`.
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    logging: String,

    /// Announce this processor in the chain-marker header.
    #[arg(long, env = "REVEAL_EXTPROC_CHAIN", default_value_t = true, action = clap::ArgAction::Set)]
    reveal_chain: bool,

    /// Name of the chain-marker header.
    #[arg(long, env = "EXTPROCS_APPLIED_HEADER", default_value = extproc_sdk::EXTPROCS_APPLIED_HEADER)]
    marker_header: String,
}

impl Args {
    fn build_service(&self) -> ExtProcService {
        let service = match self.service {
            Processor::Noop => processors::noop(),
            Processor::Trivial => processors::trivial(),
            Processor::Digest => processors::digest(),
            Processor::Echo => processors::echo(),
        };
        service.reveal_chain(self.reveal_chain).marker_header(self.marker_header.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&args.logging)).init();

    let service = args.build_service();
    info!(target: "ext_proc", processor = %service.name(), port = args.port, "starting");

    ExtProcServer::new(service)
        .with_config(ServerConfig {
            port: args.port,
            grace_period: Duration::from_secs(args.grace_period),
        })
        .on_shutdown(|| async {
            info!(target: "ext_proc", "shutdown signal received, running teardown");
        })
        .serve()
        .await?;
    Ok(())
}
