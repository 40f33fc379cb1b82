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

//! Early-exit demo: never forwards upstream, answers every request
//! directly with a description of what it received.

use extproc_sdk::{headers, ExtProcServer, ExtProcService, Phase, PhaseOutcome};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info,ext_proc=debug").init();

    let service = ExtProcService::new("echo")
        .on_fn(Phase::RequestHeaders, |input, ctx, response| {
            let message = input.headers().ok_or("expected a headers phase")?;
            // A request with no body can be answered right here.
            if message.end_of_stream {
                let body = format!(
                    "{} {}",
                    ctx.method.as_deref().unwrap_or("-"),
                    ctx.path.as_deref().unwrap_or("-"),
                );
                return Ok(PhaseOutcome::stop(
                    headers::immediate_response(
                        http::StatusCode::OK,
                        [("content-type", "text/plain")],
                        body,
                    ),
                    "echoed from request headers",
                ));
            }
            Ok(PhaseOutcome::Continue(response))
        })
        .on_fn(Phase::RequestBody, |input, ctx, response| {
            let chunk = input.body().ok_or("expected a body phase")?;
            let buffered = ctx.get_mut::<Vec<u8>>("echo.body");
            match buffered {
                Some(buffered) => buffered.extend_from_slice(&chunk.body),
                None => ctx.insert("echo.body", chunk.body.clone()),
            }
            if !chunk.end_of_stream {
                return Ok(PhaseOutcome::Continue(response));
            }
            let mut body = format!(
                "{} {}\n",
                ctx.method.as_deref().unwrap_or("-"),
                ctx.path.as_deref().unwrap_or("-"),
            )
            .into_bytes();
            body.extend(ctx.remove::<Vec<u8>>("echo.body").unwrap_or_default());
            Ok(PhaseOutcome::stop(
                headers::immediate_response(
                    http::StatusCode::OK,
                    [("content-type", "text/plain")],
                    body,
                ),
                "echoed from request body",
            ))
        });

    ExtProcServer::new(service).serve().await?;
    Ok(())
}
