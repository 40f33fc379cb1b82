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

//! The six-phase model of one proxied HTTP exchange.
//!
//! Envoy drives each exchange over a single duplex stream, sending at most
//! one message per phase in a fixed order. Every inbound message maps to
//! exactly one [`Phase`]; a message that carries none of the known payload
//! variants is a protocol violation and aborts the stream.

use std::fmt;

use extproc_api::envoy::service::ext_proc::v3::{
    processing_request, processing_response, BodyResponse, CommonResponse, HeaderMutation,
    HeadersResponse, HttpBody, HttpHeaders, HttpTrailers, ProcessingRequest, ProcessingResponse,
    TrailersResponse,
};

use crate::error::ExtProcError;

/// One step of the ext_proc conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    RequestHeaders,
    RequestBody,
    RequestTrailers,
    ResponseHeaders,
    ResponseBody,
    ResponseTrailers,
}

impl Phase {
    /// All phases in the order Envoy emits them.
    pub const ALL: [Phase; 6] = [
        Phase::RequestHeaders,
        Phase::RequestBody,
        Phase::RequestTrailers,
        Phase::ResponseHeaders,
        Phase::ResponseBody,
        Phase::ResponseTrailers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::RequestHeaders => "request_headers",
            Phase::RequestBody => "request_body",
            Phase::RequestTrailers => "request_trailers",
            Phase::ResponseHeaders => "response_headers",
            Phase::ResponseBody => "response_body",
            Phase::ResponseTrailers => "response_trailers",
        }
    }

    /// True for the three request-direction phases.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Phase::RequestHeaders | Phase::RequestBody | Phase::RequestTrailers
        )
    }

    pub fn is_headers(&self) -> bool {
        matches!(self, Phase::RequestHeaders | Phase::ResponseHeaders)
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Phase::RequestHeaders => 0,
            Phase::RequestBody => 1,
            Phase::RequestTrailers => 2,
            Phase::ResponseHeaders => 3,
            Phase::ResponseBody => 4,
            Phase::ResponseTrailers => 5,
        }
    }

    /// Classifies an inbound message, borrowing its phase payload.
    pub fn from_request(
        request: &ProcessingRequest,
    ) -> Result<(Phase, PhaseInput<'_>), ExtProcError> {
        use processing_request::Request;
        match &request.request {
            Some(Request::RequestHeaders(headers)) => {
                Ok((Phase::RequestHeaders, PhaseInput::Headers(headers)))
            },
            Some(Request::RequestBody(body)) => Ok((Phase::RequestBody, PhaseInput::Body(body))),
            Some(Request::RequestTrailers(trailers)) => {
                Ok((Phase::RequestTrailers, PhaseInput::Trailers(trailers)))
            },
            Some(Request::ResponseHeaders(headers)) => {
                Ok((Phase::ResponseHeaders, PhaseInput::Headers(headers)))
            },
            Some(Request::ResponseBody(body)) => Ok((Phase::ResponseBody, PhaseInput::Body(body))),
            Some(Request::ResponseTrailers(trailers)) => {
                Ok((Phase::ResponseTrailers, PhaseInput::Trailers(trailers)))
            },
            None => Err(ExtProcError::ProtocolViolation(
                "processing request carries no phase payload".to_owned(),
            )),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the payload carried by one phase message.
#[derive(Debug, Clone, Copy)]
pub enum PhaseInput<'a> {
    Headers(&'a HttpHeaders),
    Body(&'a HttpBody),
    Trailers(&'a HttpTrailers),
}

impl<'a> PhaseInput<'a> {
    pub fn headers(&self) -> Option<&'a HttpHeaders> {
        match self {
            PhaseInput::Headers(headers) => Some(headers),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&'a HttpBody> {
        match self {
            PhaseInput::Body(body) => Some(body),
            _ => None,
        }
    }

    pub fn trailers(&self) -> Option<&'a HttpTrailers> {
        match self {
            PhaseInput::Trailers(trailers) => Some(trailers),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum ResponseKind {
    Headers(HeadersResponse),
    Body(BodyResponse),
    Trailers(TrailersResponse),
}

/// The outbound answer to one phase message, pre-populated with CONTINUE
/// semantics and an empty header mutation. Handlers mutate it in place;
/// the dispatcher converts it into the phase-matching
/// [`ProcessingResponse`] variant on emit.
#[derive(Debug, Clone)]
pub struct PhaseResponse {
    phase: Phase,
    kind: ResponseKind,
}

impl PhaseResponse {
    /// A continue-unchanged response shaped for `phase`.
    pub fn continue_for(phase: Phase) -> Self {
        let common = CommonResponse {
            header_mutation: Some(HeaderMutation::default()),
            ..Default::default()
        };
        let kind = match phase {
            Phase::RequestHeaders | Phase::ResponseHeaders => ResponseKind::Headers(
                HeadersResponse { response: Some(common) },
            ),
            Phase::RequestBody | Phase::ResponseBody => {
                ResponseKind::Body(BodyResponse { response: Some(common) })
            },
            Phase::RequestTrailers | Phase::ResponseTrailers => ResponseKind::Trailers(
                TrailersResponse { header_mutation: Some(HeaderMutation::default()) },
            ),
        };
        PhaseResponse { phase, kind }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The header (or trailer) mutation this response will carry.
    pub fn header_mutation_mut(&mut self) -> &mut HeaderMutation {
        match &mut self.kind {
            ResponseKind::Headers(HeadersResponse { response })
            | ResponseKind::Body(BodyResponse { response }) => response
                .get_or_insert_with(CommonResponse::default)
                .header_mutation
                .get_or_insert_with(HeaderMutation::default),
            ResponseKind::Trailers(TrailersResponse { header_mutation }) => {
                header_mutation.get_or_insert_with(HeaderMutation::default)
            },
        }
    }

    /// Replaces the message body. On a body phase this swaps the current
    /// chunk; on a headers phase it switches the response status to
    /// CONTINUE_AND_REPLACE so Envoy discards the original body. Trailer
    /// phases have no body and ignore the call.
    pub fn replace_body(&mut self, body: impl Into<Vec<u8>>) {
        use extproc_api::envoy::service::ext_proc::v3::{body_mutation, BodyMutation};
        let mutation = BodyMutation { mutation: Some(body_mutation::Mutation::Body(body.into())) };
        match &mut self.kind {
            ResponseKind::Body(BodyResponse { response }) => {
                response.get_or_insert_with(CommonResponse::default).body_mutation = Some(mutation);
            },
            ResponseKind::Headers(HeadersResponse { response }) => {
                let common = response.get_or_insert_with(CommonResponse::default);
                common.status =
                    extproc_api::envoy::service::ext_proc::v3::common_response::ResponseStatus::ContinueAndReplace
                        as i32;
                common.body_mutation = Some(mutation);
            },
            ResponseKind::Trailers(_) => {},
        }
    }

    /// Asks Envoy to recompute the route after the header mutation lands.
    /// Only meaningful on the request-headers phase.
    pub fn clear_route_cache(&mut self) {
        if let ResponseKind::Headers(HeadersResponse { response })
        | ResponseKind::Body(BodyResponse { response }) = &mut self.kind
        {
            response.get_or_insert_with(CommonResponse::default).clear_route_cache = true;
        }
    }

    pub fn into_processing_response(self) -> ProcessingResponse {
        use processing_response::Response;
        let response = match (self.phase.is_request(), self.kind) {
            (true, ResponseKind::Headers(headers)) => Response::RequestHeaders(headers),
            (false, ResponseKind::Headers(headers)) => Response::ResponseHeaders(headers),
            (true, ResponseKind::Body(body)) => Response::RequestBody(body),
            (false, ResponseKind::Body(body)) => Response::ResponseBody(body),
            (true, ResponseKind::Trailers(trailers)) => Response::RequestTrailers(trailers),
            (false, ResponseKind::Trailers(trailers)) => Response::ResponseTrailers(trailers),
        };
        ProcessingResponse { response: Some(response), ..Default::default() }
    }
}
