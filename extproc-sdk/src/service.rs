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

//! The per-stream phase dispatcher and its tonic service binding.
//!
//! One `Process` stream corresponds to one proxied HTTP exchange. The
//! dispatcher pulls inbound messages one at a time and always emits the
//! response for phase N before reading phase N+1, which is what keeps
//! Envoy's filter state machine in lockstep with ours.

use std::pin::Pin;

use async_stream::stream;
use extproc_api::envoy::service::ext_proc::v3::external_processor_server::ExternalProcessor;
use extproc_api::envoy::service::ext_proc::v3::{
    processing_response, HttpHeaders, ImmediateResponse, ProcessingRequest, ProcessingResponse,
};
use futures::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use crate::context::CallContext;
use crate::error::{ExtProcError, HandlerError};
use crate::handler::{handler_fn, HandlerRegistry, PhaseHandler, PhaseOutcome};
use crate::headers;
use crate::phase::{Phase, PhaseInput, PhaseResponse};
use crate::timer::Timer;

/// Default name of the chain-marker header appended on the response path.
pub const EXTPROCS_APPLIED_HEADER: &str = "x-ext-procs-applied";

/// An external processor: a name, six handler slots, and a few behavior
/// switches. Cheap to clone; one clone is captured per stream.
#[derive(Clone)]
pub struct ExtProcService {
    name: String,
    registry: HandlerRegistry,
    reveal_chain: bool,
    marker_header: String,
    strict_phase_coverage: bool,
}

impl ExtProcService {
    /// A processor with no handlers: every phase continues unchanged.
    pub fn new(name: impl Into<String>) -> Self {
        ExtProcService {
            name: name.into(),
            registry: HandlerRegistry::new(),
            reveal_chain: true,
            marker_header: EXTPROCS_APPLIED_HEADER.to_owned(),
            strict_phase_coverage: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Installs `handler` for `phase`, replacing any previous handler.
    pub fn on(mut self, phase: Phase, handler: impl PhaseHandler + 'static) -> Self {
        self.registry.register(phase, handler);
        self
    }

    /// Installs a non-suspending closure for `phase`.
    pub fn on_fn<F>(self, phase: Phase, f: F) -> Self
    where
        F: for<'a, 'b> Fn(
                PhaseInput<'a>,
                &'b mut CallContext,
                PhaseResponse,
            ) -> Result<PhaseOutcome, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.on(phase, handler_fn(f))
    }

    /// Whether to announce this processor in the chain-marker header on
    /// the response path. On by default.
    pub fn reveal_chain(mut self, reveal: bool) -> Self {
        self.reveal_chain = reveal;
        self
    }

    /// Renames the chain-marker header.
    pub fn marker_header(mut self, name: impl Into<String>) -> Self {
        self.marker_header = name.into();
        self
    }

    /// When on, a phase without a registered handler aborts the stream
    /// with UNIMPLEMENTED instead of continuing unchanged.
    pub fn strict_phase_coverage(mut self, strict: bool) -> Self {
        self.strict_phase_coverage = strict;
        self
    }

    /// Runs the dispatcher over an arbitrary inbound message stream.
    ///
    /// This is the whole protocol engine; the tonic binding below only
    /// adapts it. Tests feed it canned message sequences directly.
    pub fn process_stream<S>(
        &self,
        inbound: S,
    ) -> impl Stream<Item = Result<ProcessingResponse, Status>> + Send
    where
        S: Stream<Item = Result<ProcessingRequest, Status>> + Send + 'static,
    {
        let service = self.clone();
        stream! {
            let mut ctx = CallContext::new();
            let mut timer = Timer::new();
            tokio::pin!(inbound);
            while let Some(message) = inbound.next().await {
                let request = match message {
                    Ok(request) => request,
                    Err(status) => {
                        // Peer cancellation is a normal way for a stream
                        // to end, not a failure of ours.
                        debug!(target: "ext_proc",
                            processor = %service.name,
                            code = ?status.code(),
                            "inbound stream closed by peer");
                        return;
                    },
                };
                let (phase, input) = match Phase::from_request(&request) {
                    Ok(classified) => classified,
                    Err(err) => {
                        warn!(target: "ext_proc", processor = %service.name, %err, "aborting stream");
                        yield Err(err.into());
                        return;
                    },
                };
                ctx.phase = Some(phase);
                if let PhaseInput::Headers(message) = input {
                    ctx.absorb_headers(phase, message);
                }
                if service.strict_phase_coverage && !service.registry.covers(phase) {
                    let err = ExtProcError::HandlerUnavailable(phase);
                    warn!(target: "ext_proc", processor = %service.name, %err, "aborting stream");
                    yield Err(err.into());
                    return;
                }

                let mut response = PhaseResponse::continue_for(phase);
                if service.reveal_chain && phase == Phase::ResponseHeaders {
                    let value = service.chain_marker_value(input.headers());
                    headers::add_header(response.header_mutation_mut(), &service.marker_header, value);
                }

                debug!(target: "ext_proc",
                    processor = %service.name,
                    phase = %phase,
                    request_id = ctx.request_id.as_deref().unwrap_or("-"),
                    "dispatching phase");
                timer.tic();
                let outcome = service.registry.handler_for(phase).handle(input, &mut ctx, response).await;
                let elapsed = timer.toc();
                ctx.overhead_ns += elapsed.as_nanos();
                debug!(target: "ext_proc",
                    processor = %service.name,
                    phase = %phase,
                    request_id = ctx.request_id.as_deref().unwrap_or("-"),
                    elapsed = ?elapsed,
                    "phase handled");

                match outcome {
                    Ok(PhaseOutcome::Continue(response)) => {
                        yield Ok(response.into_processing_response());
                    },
                    Ok(PhaseOutcome::Stop { mut response, reason }) => {
                        if service.reveal_chain {
                            service.mark_immediate_response(&mut response);
                        }
                        info!(target: "ext_proc",
                            processor = %service.name,
                            phase = %phase,
                            request_id = ctx.request_id.as_deref().unwrap_or("-"),
                            reason = reason.as_deref().unwrap_or("-"),
                            "early exit");
                        yield Ok(ProcessingResponse {
                            response: Some(processing_response::Response::ImmediateResponse(response)),
                            ..Default::default()
                        });
                        return;
                    },
                    Err(source) => {
                        let err = ExtProcError::HandlerFailure { phase, source };
                        warn!(target: "ext_proc", processor = %service.name, %err, "aborting stream");
                        yield Err(err.into());
                        return;
                    },
                }
            }
            debug!(target: "ext_proc",
                processor = %service.name,
                request_id = ctx.request_id.as_deref().unwrap_or("-"),
                overhead_ns = %ctx.overhead_ns,
                "stream complete");
        }
    }

    /// Marker value for the response headers: this processor's name,
    /// prepended to whatever an upstream processor already recorded.
    fn chain_marker_value(&self, inbound: Option<&HttpHeaders>) -> String {
        let existing = inbound
            .and_then(|message| message.headers.as_ref())
            .and_then(|map| headers::get_header(map, &self.marker_header));
        match existing {
            Some(upstream) => format!("{},{}", self.name, upstream),
            None => self.name.clone(),
        }
    }

    /// Stamps the chain marker onto an early-exit response, prepending to
    /// any value the handler set itself.
    fn mark_immediate_response(&self, response: &mut ImmediateResponse) {
        let mutation = response.headers.get_or_insert_with(Default::default);
        let existing = mutation.set_headers.iter_mut().find(|option| {
            option
                .header
                .as_ref()
                .is_some_and(|header| header.key.eq_ignore_ascii_case(&self.marker_header))
        });
        if let Some(option) = existing {
            if let Some(header) = option.header.as_mut() {
                let upstream = headers::header_text(header).into_owned();
                header.raw_value = format!("{},{}", self.name, upstream).into_bytes();
                header.value.clear();
            }
        } else {
            headers::add_header(mutation, &self.marker_header, self.name.as_bytes());
        }
    }
}

#[tonic::async_trait]
impl ExternalProcessor for ExtProcService {
    type ProcessStream = Pin<Box<dyn Stream<Item = Result<ProcessingResponse, Status>> + Send>>;

    async fn process(
        &self,
        request: Request<Streaming<ProcessingRequest>>,
    ) -> Result<Response<Self::ProcessStream>, Status> {
        let inbound = request.into_inner();
        Ok(Response::new(Box::pin(self.process_stream(inbound))))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use extproc_api::envoy::service::ext_proc::v3::processing_response::Response as Outbound;
    use futures::stream;
    use sha2::{Digest, Sha256};
    use tokio::sync::Mutex;
    use tonic::Code;

    use super::*;
    use crate::error::HandlerError;
    use crate::testing::Exchange;

    async fn collect(
        service: &ExtProcService,
        messages: Vec<ProcessingRequest>,
    ) -> Vec<Result<ProcessingResponse, Status>> {
        service
            .process_stream(stream::iter(messages.into_iter().map(Ok)))
            .collect()
            .await
    }

    fn outbound(result: &Result<ProcessingResponse, Status>) -> &Outbound {
        result.as_ref().unwrap().response.as_ref().unwrap()
    }

    /// Value of a header set by a response-headers message, if any.
    fn set_header(result: &Result<ProcessingResponse, Status>, name: &str) -> Option<String> {
        let Outbound::ResponseHeaders(headers) = outbound(result) else {
            return None;
        };
        headers
            .response
            .as_ref()?
            .header_mutation
            .as_ref()?
            .set_headers
            .iter()
            .find(|option| {
                option
                    .header
                    .as_ref()
                    .is_some_and(|header| header.key.eq_ignore_ascii_case(name))
            })
            .map(|option| {
                headers::header_text(option.header.as_ref().unwrap()).into_owned()
            })
    }

    #[tokio::test]
    async fn no_handlers_pass_all_six_phases_through() {
        let service = ExtProcService::new("noop").reveal_chain(false);
        let responses = collect(&service, Exchange::new("GET", "/ping").messages()).await;
        assert_eq!(responses.len(), 6);
        assert!(matches!(outbound(&responses[0]), Outbound::RequestHeaders(_)));
        assert!(matches!(outbound(&responses[1]), Outbound::RequestBody(_)));
        assert!(matches!(outbound(&responses[2]), Outbound::RequestTrailers(_)));
        assert!(matches!(outbound(&responses[3]), Outbound::ResponseHeaders(_)));
        assert!(matches!(outbound(&responses[4]), Outbound::ResponseBody(_)));
        assert!(matches!(outbound(&responses[5]), Outbound::ResponseTrailers(_)));
    }

    #[tokio::test]
    async fn malformed_message_aborts_with_invalid_argument() {
        let service = ExtProcService::new("noop");
        let mut messages = Exchange::new("GET", "/ping").messages();
        messages[2] = ProcessingRequest::default();
        let responses = collect(&service, messages).await;
        // Two good answers, then the abort; nothing after it.
        assert_eq!(responses.len(), 3);
        assert!(responses[0].is_ok());
        assert!(responses[1].is_ok());
        let status = responses[2].as_ref().unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn chain_marker_prepends_this_processor() {
        let service = ExtProcService::new("A");
        let exchange = Exchange::new("GET", "/ping").response_header(EXTPROCS_APPLIED_HEADER, "B");
        let responses = collect(&service, exchange.messages()).await;
        assert_eq!(set_header(&responses[3], EXTPROCS_APPLIED_HEADER).as_deref(), Some("A,B"));
    }

    #[tokio::test]
    async fn chain_marker_starts_the_chain_when_absent() {
        let service = ExtProcService::new("solo");
        let responses = collect(&service, Exchange::new("GET", "/ping").messages()).await;
        assert_eq!(set_header(&responses[3], EXTPROCS_APPLIED_HEADER).as_deref(), Some("solo"));
    }

    #[tokio::test]
    async fn chain_marker_absent_when_reveal_is_disabled() {
        let service = ExtProcService::new("hidden").reveal_chain(false);
        let exchange = Exchange::new("GET", "/ping").response_header(EXTPROCS_APPLIED_HEADER, "B");
        let responses = collect(&service, exchange.messages()).await;
        assert_eq!(set_header(&responses[3], EXTPROCS_APPLIED_HEADER), None);
    }

    #[tokio::test]
    async fn custom_marker_header_name_is_used() {
        let service = ExtProcService::new("custom").marker_header("x-chain");
        let responses = collect(&service, Exchange::new("GET", "/ping").messages()).await;
        assert_eq!(set_header(&responses[3], "x-chain").as_deref(), Some("custom"));
        assert_eq!(set_header(&responses[3], EXTPROCS_APPLIED_HEADER), None);
    }

    #[tokio::test]
    async fn early_exit_from_request_headers_emits_exactly_one_message() {
        let service = ExtProcService::new("gate").reveal_chain(false).on_fn(
            Phase::RequestHeaders,
            |_input, _ctx, _response| {
                Ok(PhaseOutcome::stop(
                    headers::immediate_response(
                        http::StatusCode::FORBIDDEN,
                        [("x-denied-by", "gate")],
                        "denied",
                    ),
                    "no token",
                ))
            },
        );
        let responses = collect(&service, Exchange::new("GET", "/secret").messages()).await;
        assert_eq!(responses.len(), 1);
        let Outbound::ImmediateResponse(immediate) = outbound(&responses[0]) else {
            panic!("expected immediate response");
        };
        assert_eq!(immediate.status.as_ref().unwrap().code, 403);
        assert_eq!(immediate.body, b"denied");
    }

    #[tokio::test]
    async fn early_exit_from_request_body_short_circuits_later_phases() {
        // Track which phases any handler observed.
        let seen: Arc<Mutex<Vec<Phase>>> = Arc::new(Mutex::new(Vec::new()));

        struct Recorder {
            seen: Arc<Mutex<Vec<Phase>>>,
            stop_at: Option<Phase>,
        }

        #[async_trait]
        impl PhaseHandler for Recorder {
            async fn handle(
                &self,
                _input: PhaseInput<'_>,
                ctx: &mut CallContext,
                response: PhaseResponse,
            ) -> Result<PhaseOutcome, HandlerError> {
                let phase = ctx.phase.unwrap();
                self.seen.lock().await.push(phase);
                if self.stop_at == Some(phase) {
                    return Ok(PhaseOutcome::stop(
                        headers::immediate_response(
                            http::StatusCode::PAYLOAD_TOO_LARGE,
                            Vec::<(&str, &str)>::new(),
                            "too big",
                        ),
                        "body rejected",
                    ));
                }
                Ok(PhaseOutcome::Continue(response))
            }
        }

        let mut service = ExtProcService::new("limiter").reveal_chain(false);
        for phase in Phase::ALL {
            let stop_at = (phase == Phase::RequestBody).then_some(Phase::RequestBody);
            service = service.on(phase, Recorder { seen: Arc::clone(&seen), stop_at });
        }

        let exchange = Exchange::new("POST", "/upload").request_body("0123456789");
        let responses = collect(&service, exchange.messages()).await;
        assert_eq!(responses.len(), 2);
        assert!(matches!(outbound(&responses[0]), Outbound::RequestHeaders(_)));
        assert!(matches!(outbound(&responses[1]), Outbound::ImmediateResponse(_)));
        assert_eq!(*seen.lock().await, vec![Phase::RequestHeaders, Phase::RequestBody]);
    }

    #[tokio::test]
    async fn early_exit_carries_the_chain_marker_when_enabled() {
        let service = ExtProcService::new("gate").on_fn(
            Phase::RequestHeaders,
            |_input, _ctx, _response| {
                Ok(PhaseOutcome::stop(
                    headers::immediate_response(
                        http::StatusCode::UNAUTHORIZED,
                        Vec::<(&str, &str)>::new(),
                        "",
                    ),
                    "unauthenticated",
                ))
            },
        );
        let responses = collect(&service, Exchange::new("GET", "/secret").messages()).await;
        let Outbound::ImmediateResponse(immediate) = outbound(&responses[0]) else {
            panic!("expected immediate response");
        };
        let mutation = immediate.headers.as_ref().unwrap();
        let marker = mutation
            .set_headers
            .iter()
            .find(|option| {
                option.header.as_ref().is_some_and(|h| h.key == EXTPROCS_APPLIED_HEADER)
            })
            .expect("marker header missing");
        assert_eq!(marker.header.as_ref().unwrap().raw_value, b"gate");
    }

    #[tokio::test]
    async fn handler_error_aborts_with_internal() {
        let service = ExtProcService::new("flaky").on_fn(
            Phase::RequestBody,
            |_input, _ctx, _response| Err("database unreachable".into()),
        );
        let responses = collect(&service, Exchange::new("POST", "/x").messages()).await;
        assert_eq!(responses.len(), 2);
        let status = responses[1].as_ref().unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("request_body"));
    }

    #[tokio::test]
    async fn strict_mode_aborts_on_the_first_uncovered_phase() {
        let service = ExtProcService::new("strict")
            .strict_phase_coverage(true)
            .on_fn(Phase::RequestHeaders, |_input, _ctx, response| {
                Ok(PhaseOutcome::Continue(response))
            });
        let responses = collect(&service, Exchange::new("GET", "/ping").messages()).await;
        assert_eq!(responses.len(), 2);
        assert!(responses[0].is_ok());
        let status = responses[1].as_ref().unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);
    }

    #[tokio::test]
    async fn peer_cancellation_terminates_without_output() {
        let service = ExtProcService::new("calm");
        let exchange = Exchange::new("GET", "/ping");
        let mut messages: Vec<Result<ProcessingRequest, Status>> =
            exchange.messages().into_iter().map(Ok).take(2).collect();
        messages.push(Err(Status::cancelled("client went away")));
        let responses: Vec<_> = service.process_stream(stream::iter(messages)).collect().await;
        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn context_carries_values_across_phases() {
        let service = ExtProcService::new("digest")
            .reveal_chain(false)
            .on_fn(Phase::RequestHeaders, |_input, ctx, response| {
                let mut hasher = Sha256::new();
                hasher.update(ctx.method.as_deref().unwrap_or("").as_bytes());
                hasher.update(b" ");
                hasher.update(ctx.path.as_deref().unwrap_or("").as_bytes());
                ctx.insert("hasher", hasher);
                Ok(PhaseOutcome::Continue(response))
            })
            .on_fn(Phase::RequestBody, |input, ctx, response| {
                let body = input.body().ok_or("not a body phase")?;
                let hasher = ctx.get_mut::<Sha256>("hasher").ok_or("hasher missing")?;
                hasher.update(&body.body);
                if body.end_of_stream {
                    let hasher = ctx.remove::<Sha256>("hasher").ok_or("hasher missing")?;
                    ctx.insert("request_digest", hex::encode(hasher.finalize()));
                }
                Ok(PhaseOutcome::Continue(response))
            })
            .on_fn(Phase::ResponseHeaders, |_input, ctx, mut response| {
                let digest = ctx.get::<String>("request_digest").ok_or("digest missing")?;
                headers::add_header(
                    response.header_mutation_mut(),
                    "x-request-digest",
                    digest.as_bytes(),
                );
                Ok(PhaseOutcome::Continue(response))
            });

        let exchange = Exchange::new("POST", "/orders").request_body(r#"{"qty":2}"#);
        let responses = collect(&service, exchange.messages()).await;
        assert_eq!(responses.len(), 6);
        let digest = set_header(&responses[3], "x-request-digest").expect("digest header missing");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));

        let mut expected = Sha256::new();
        expected.update(b"POST /orders");
        expected.update(br#"{"qty":2}"#);
        assert_eq!(digest, hex::encode(expected.finalize()));
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn every_phase_dispatch_is_traced() {
        let service = ExtProcService::new("traced").reveal_chain(false);
        let responses = collect(&service, Exchange::new("GET", "/ping").messages()).await;
        assert_eq!(responses.len(), 6);
        assert!(logs_contain("request_headers"));
        assert!(logs_contain("response_trailers"));
        assert!(logs_contain("stream complete"));
    }

    #[tokio::test]
    async fn concurrent_streams_do_not_share_context() {
        let service = ExtProcService::new("isolated")
            .reveal_chain(false)
            .on_fn(Phase::RequestHeaders, |_input, ctx, response| {
                let tag = ctx.request_id.clone().ok_or("request id missing")?;
                ctx.insert("tag", tag);
                Ok(PhaseOutcome::Continue(response))
            })
            .on_fn(Phase::ResponseHeaders, |_input, ctx, mut response| {
                let tag = ctx.get::<String>("tag").ok_or("tag missing")?.clone();
                headers::add_header(response.header_mutation_mut(), "x-tag", tag.into_bytes());
                Ok(PhaseOutcome::Continue(response))
            });

        let left = Exchange::new("GET", "/a").request_id("stream-left");
        let right = Exchange::new("GET", "/b").request_id("stream-right");
        let (left_responses, right_responses) =
            tokio::join!(collect(&service, left.messages()), collect(&service, right.messages()));
        assert_eq!(set_header(&left_responses[3], "x-tag").as_deref(), Some("stream-left"));
        assert_eq!(set_header(&right_responses[3], "x-tag").as_deref(), Some("stream-right"));
    }
}
