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

use std::sync::Arc;

use async_trait::async_trait;
use extproc_api::envoy::service::ext_proc::v3::ImmediateResponse;

use crate::context::CallContext;
use crate::error::HandlerError;
use crate::phase::{Phase, PhaseInput, PhaseResponse};

/// What a handler decided for its phase.
#[derive(Debug)]
pub enum PhaseOutcome {
    /// Emit the (possibly mutated) phase response and keep the stream open.
    Continue(PhaseResponse),
    /// Short-circuit the exchange: the immediate response becomes the final
    /// outbound message and the stream terminates. Not an error.
    Stop {
        response: ImmediateResponse,
        reason: Option<String>,
    },
}

impl PhaseOutcome {
    /// Convenience for the common early-exit shape.
    pub fn stop(response: ImmediateResponse, reason: impl Into<String>) -> Self {
        PhaseOutcome::Stop { response, reason: Some(reason.into()) }
    }
}

/// Processing logic for one phase. Implementations may suspend freely;
/// the dispatcher owns the context for the duration of the call, so no
/// locking is involved.
#[async_trait]
pub trait PhaseHandler: Send + Sync {
    async fn handle(
        &self,
        input: PhaseInput<'_>,
        ctx: &mut CallContext,
        response: PhaseResponse,
    ) -> Result<PhaseOutcome, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> PhaseHandler for FnHandler<F>
where
    F: for<'a, 'b> Fn(
            PhaseInput<'a>,
            &'b mut CallContext,
            PhaseResponse,
        ) -> Result<PhaseOutcome, HandlerError>
        + Send
        + Sync,
{
    async fn handle(
        &self,
        input: PhaseInput<'_>,
        ctx: &mut CallContext,
        response: PhaseResponse,
    ) -> Result<PhaseOutcome, HandlerError> {
        (self.0)(input, ctx, response)
    }
}

/// Wraps a non-suspending closure as a [`PhaseHandler`]. Handlers that
/// need to await something implement the trait directly.
pub fn handler_fn<F>(f: F) -> impl PhaseHandler
where
    F: for<'a, 'b> Fn(
            PhaseInput<'a>,
            &'b mut CallContext,
            PhaseResponse,
        ) -> Result<PhaseOutcome, HandlerError>
        + Send
        + Sync,
{
    FnHandler(f)
}

struct ContinueUnchanged;

#[async_trait]
impl PhaseHandler for ContinueUnchanged {
    async fn handle(
        &self,
        _input: PhaseInput<'_>,
        _ctx: &mut CallContext,
        response: PhaseResponse,
    ) -> Result<PhaseOutcome, HandlerError> {
        Ok(PhaseOutcome::Continue(response))
    }
}

/// Six per-phase handler slots. Registering for an already-covered phase
/// replaces the previous handler; uncovered phases fall back to a shared
/// continue-unchanged handler so a partially-covered processor still
/// answers every message.
#[derive(Clone)]
pub struct HandlerRegistry {
    slots: [Option<Arc<dyn PhaseHandler>>; 6],
    fallback: Arc<dyn PhaseHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            slots: [None, None, None, None, None, None],
            fallback: Arc::new(ContinueUnchanged),
        }
    }

    pub fn register(&mut self, phase: Phase, handler: impl PhaseHandler + 'static) {
        self.register_arc(phase, Arc::new(handler));
    }

    pub fn register_arc(&mut self, phase: Phase, handler: Arc<dyn PhaseHandler>) {
        self.slots[phase.index()] = Some(handler);
    }

    /// Whether a handler was explicitly registered for `phase`.
    pub fn covers(&self, phase: Phase) -> bool {
        self.slots[phase.index()].is_some()
    }

    /// The handler to run for `phase`: the registered one, or the shared
    /// continue-unchanged fallback.
    pub fn handler_for(&self, phase: Phase) -> &Arc<dyn PhaseHandler> {
        self.slots[phase.index()].as_ref().unwrap_or(&self.fallback)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        HandlerRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extproc_api::envoy::service::ext_proc::v3::HttpHeaders;

    use crate::headers;

    fn headers_input() -> HttpHeaders {
        HttpHeaders::default()
    }

    #[tokio::test]
    async fn fallback_passes_the_response_through_unchanged() {
        let registry = HandlerRegistry::new();
        assert!(!registry.covers(Phase::RequestBody));
        let mut ctx = CallContext::new();
        let input = headers_input();
        let outcome = registry
            .handler_for(Phase::RequestHeaders)
            .handle(
                PhaseInput::Headers(&input),
                &mut ctx,
                PhaseResponse::continue_for(Phase::RequestHeaders),
            )
            .await
            .unwrap();
        let PhaseOutcome::Continue(response) = outcome else {
            panic!("fallback must continue");
        };
        let message = response.into_processing_response();
        assert!(message.response.is_some());
    }

    #[tokio::test]
    async fn registering_twice_replaces_the_first_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            Phase::RequestHeaders,
            handler_fn(|_input, _ctx, mut response| {
                headers::add_header(response.header_mutation_mut(), "x-handler", "first");
                Ok(PhaseOutcome::Continue(response))
            }),
        );
        registry.register(
            Phase::RequestHeaders,
            handler_fn(|_input, _ctx, mut response| {
                headers::add_header(response.header_mutation_mut(), "x-handler", "second");
                Ok(PhaseOutcome::Continue(response))
            }),
        );
        assert!(registry.covers(Phase::RequestHeaders));

        let mut ctx = CallContext::new();
        let input = headers_input();
        let outcome = registry
            .handler_for(Phase::RequestHeaders)
            .handle(
                PhaseInput::Headers(&input),
                &mut ctx,
                PhaseResponse::continue_for(Phase::RequestHeaders),
            )
            .await
            .unwrap();
        let PhaseOutcome::Continue(mut response) = outcome else {
            panic!("handler must continue");
        };
        let mutation = response.header_mutation_mut();
        assert_eq!(mutation.set_headers.len(), 1);
        assert_eq!(
            mutation.set_headers[0].header.as_ref().unwrap().raw_value,
            b"second"
        );
    }
}
