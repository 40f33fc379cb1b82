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

//! Exchange-wide timing: tells upstreams when the request started via
//! `x-request-started`, and tells the caller how long the whole exchange
//! took via `x-duration-ns` on the response body.

use extproc_sdk::{headers, ExtProcServer, ExtProcService, Phase, PhaseOutcome, Timer};

const STARTED_HEADER: &str = "x-request-started";
const DURATION_HEADER: &str = "x-duration-ns";
const TIMER_KEY: &str = "timer";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info,ext_proc=debug").init();

    let service = ExtProcService::new("timer")
        .on_fn(Phase::RequestHeaders, |_input, ctx, mut response| {
            let timer = Timer::new();
            headers::add_header(response.header_mutation_mut(), STARTED_HEADER, timer.started_iso());
            ctx.insert(TIMER_KEY, timer);
            Ok(PhaseOutcome::Continue(response))
        })
        .on_fn(Phase::ResponseBody, |_input, ctx, mut response| {
            if let Some(timer) = ctx.get_mut::<Timer>(TIMER_KEY) {
                timer.toc();
                headers::add_header(response.header_mutation_mut(), STARTED_HEADER, timer.started_iso());
                headers::add_header(
                    response.header_mutation_mut(),
                    DURATION_HEADER,
                    timer.duration_ns().to_string(),
                );
            }
            Ok(PhaseOutcome::Continue(response))
        });

    ExtProcServer::new(service).serve().await?;
    Ok(())
}
