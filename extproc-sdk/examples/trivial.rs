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

//! Smallest useful processor: echoes the Envoy request id back as
//! `x-extra-request-id`, both to the upstream and to the caller.

use extproc_sdk::{
    headers, CallContext, ExtProcServer, ExtProcService, HandlerError, Phase, PhaseInput,
    PhaseOutcome, PhaseResponse,
};

fn stamp_extra_request_id(
    _input: PhaseInput<'_>,
    ctx: &mut CallContext,
    mut response: PhaseResponse,
) -> Result<PhaseOutcome, HandlerError> {
    if let Some(id) = ctx.request_id.as_deref() {
        headers::add_header(response.header_mutation_mut(), "x-extra-request-id", id);
    }
    Ok(PhaseOutcome::Continue(response))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info,ext_proc=debug").init();

    let service = ExtProcService::new("trivial")
        .on_fn(Phase::RequestHeaders, stamp_extra_request_id)
        .on_fn(Phase::ResponseHeaders, stamp_extra_request_id);

    ExtProcServer::new(service).serve().await?;
    Ok(())
}
