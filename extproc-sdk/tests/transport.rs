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

//! End-to-end checks over a real tonic transport: server on an ephemeral
//! port, driven by the generated ext_proc client.

use std::time::Duration;

use extproc_sdk::api::envoy::service::ext_proc::v3::external_processor_client::ExternalProcessorClient;
use extproc_sdk::api::envoy::service::ext_proc::v3::external_processor_server::ExternalProcessorServer;
use extproc_sdk::api::envoy::service::ext_proc::v3::{
    processing_response, ProcessingRequest, ProcessingResponse,
};
use extproc_sdk::testing::Exchange;
use extproc_sdk::{headers, ExtProcService, Phase, PhaseOutcome, EXTPROCS_APPLIED_HEADER};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::HealthCheckRequest;
use tonic_health::server::health_reporter;

async fn spawn_server(service: ExtProcService) -> Channel {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let incoming = TcpListenerStream::new(listener);

    let (mut reporter, health_service) = health_reporter();
    reporter.set_serving::<ExternalProcessorServer<ExtProcService>>().await;

    tokio::spawn(async move {
        Server::builder()
            .add_service(health_service)
            .add_service(ExternalProcessorServer::new(service))
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });

    let endpoint = format!("http://{addr}");
    for _ in 0..20 {
        if let Ok(channel) = Channel::from_shared(endpoint.clone()).unwrap().connect().await {
            return channel;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("server at {endpoint} never became reachable");
}

fn set_header(response: &ProcessingResponse, name: &str) -> Option<String> {
    let processing_response::Response::ResponseHeaders(headers) = response.response.as_ref()?
    else {
        return None;
    };
    headers
        .response
        .as_ref()?
        .header_mutation
        .as_ref()?
        .set_headers
        .iter()
        .find(|option| option.header.as_ref().is_some_and(|h| h.key == name))
        .map(|option| headers::header_text(option.header.as_ref().unwrap()).into_owned())
}

#[tokio::test]
async fn full_exchange_over_the_wire() {
    let service = ExtProcService::new("wire").on_fn(Phase::RequestHeaders, |_input, ctx, response| {
        ctx.insert("seen", true);
        Ok(PhaseOutcome::Continue(response))
    });
    let channel = spawn_server(service).await;
    let mut client = ExternalProcessorClient::new(channel);

    let exchange = Exchange::new("GET", "/ping").request_id("wire-1");
    let response = client
        .process(futures::stream::iter(exchange.messages()))
        .await
        .unwrap();
    let mut inbound = response.into_inner();

    let mut responses = Vec::new();
    while let Some(message) = inbound.message().await.unwrap() {
        responses.push(message);
    }
    assert_eq!(responses.len(), 6);
    assert_eq!(set_header(&responses[3], EXTPROCS_APPLIED_HEADER).as_deref(), Some("wire"));
}

#[tokio::test]
async fn early_exit_closes_the_stream_after_the_immediate_response() {
    let service = ExtProcService::new("gate").on_fn(Phase::RequestHeaders, |_input, _ctx, _response| {
        Ok(PhaseOutcome::stop(
            headers::immediate_response(
                http::StatusCode::TOO_MANY_REQUESTS,
                [("retry-after", "1")],
                "slow down",
            ),
            "rate limited",
        ))
    });
    let channel = spawn_server(service).await;
    let mut client = ExternalProcessorClient::new(channel);

    let exchange = Exchange::new("GET", "/burst");
    let mut inbound = client
        .process(futures::stream::iter(exchange.messages()))
        .await
        .unwrap()
        .into_inner();

    let first = inbound.message().await.unwrap().expect("one response expected");
    let Some(processing_response::Response::ImmediateResponse(immediate)) = first.response else {
        panic!("expected immediate response");
    };
    assert_eq!(immediate.status.unwrap().code, 429);
    assert!(inbound.message().await.unwrap().is_none(), "stream must end after early exit");
}

#[tokio::test]
async fn unknown_method_is_answered_with_unimplemented() {
    let channel = spawn_server(ExtProcService::new("process-only")).await;
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready().await.expect("channel not ready");

    let codec: tonic::codec::ProstCodec<ProcessingRequest, ProcessingResponse> =
        tonic::codec::ProstCodec::default();
    let path = http::uri::PathAndQuery::from_static(
        "/envoy.service.ext_proc.v3.ExternalProcessor/Observe",
    );
    let outbound = futures::stream::iter(Exchange::new("GET", "/ping").messages());
    let status = grpc
        .streaming(tonic::Request::new(outbound), path, codec)
        .await
        .expect_err("unknown method must be rejected");
    assert_eq!(status.code(), tonic::Code::Unimplemented);
}

#[tokio::test]
async fn health_endpoint_reports_serving() {
    let channel = spawn_server(ExtProcService::new("healthy")).await;
    let mut health = HealthClient::new(channel);

    let response = health
        .check(HealthCheckRequest {
            service: "envoy.service.ext_proc.v3.ExternalProcessor".to_owned(),
        })
        .await
        .unwrap();
    assert_eq!(response.into_inner().status, ServingStatus::Serving as i32);
}
