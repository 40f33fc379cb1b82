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

//! Hashes each request (tenant, method, path, body) across phases and
//! stamps the running hex digest as `x-request-digest`: on the request
//! headers for GETs, on each hashed body chunk otherwise, and again on
//! the response body. Demonstrates cross-phase state in the call context
//! with trait-based handlers.

use std::borrow::Cow;

use async_trait::async_trait;
use extproc_sdk::{
    headers, CallContext, ExtProcServer, ExtProcService, HandlerError, Phase, PhaseHandler,
    PhaseInput, PhaseOutcome, PhaseResponse,
};
use sha2::{Digest, Sha256};

const DIGEST_HEADER: &str = "x-request-digest";
const TENANT_HEADER: &str = "x-tenant-id";
const HASHER_KEY: &str = "digest.hasher";
const DIGEST_KEY: &str = "digest.hex";

struct SeedDigest;

#[async_trait]
impl PhaseHandler for SeedDigest {
    async fn handle(
        &self,
        input: PhaseInput<'_>,
        ctx: &mut CallContext,
        mut response: PhaseResponse,
    ) -> Result<PhaseOutcome, HandlerError> {
        let message = input.headers().ok_or("expected a headers phase")?;
        let tenant = message
            .headers
            .as_ref()
            .and_then(|map| headers::get_header(map, TENANT_HEADER))
            .unwrap_or(Cow::Borrowed("unknown"));

        let mut hasher = Sha256::new();
        hasher.update(tenant.as_bytes());
        hasher.update(ctx.method.as_deref().unwrap_or("").as_bytes());
        hasher.update(ctx.path.as_deref().unwrap_or("").as_bytes());

        // GETs may never see a body phase; stamp the header digest now.
        if ctx.method.as_deref().is_some_and(|method| method.eq_ignore_ascii_case("GET")) {
            let digest = hex::encode(hasher.clone().finalize());
            headers::add_header(response.header_mutation_mut(), DIGEST_HEADER, digest.clone());
            ctx.insert(DIGEST_KEY, digest);
        }
        ctx.insert(HASHER_KEY, hasher);
        Ok(PhaseOutcome::Continue(response))
    }
}

struct FeedDigest;

#[async_trait]
impl PhaseHandler for FeedDigest {
    async fn handle(
        &self,
        input: PhaseInput<'_>,
        ctx: &mut CallContext,
        mut response: PhaseResponse,
    ) -> Result<PhaseOutcome, HandlerError> {
        let body = input.body().ok_or("expected a body phase")?;
        let hasher = ctx.get_mut::<Sha256>(HASHER_KEY).ok_or("hasher not seeded")?;
        hasher.update(&body.body);
        let digest = hex::encode(hasher.clone().finalize());
        headers::add_header(response.header_mutation_mut(), DIGEST_HEADER, digest.clone());
        ctx.insert(DIGEST_KEY, digest);
        Ok(PhaseOutcome::Continue(response))
    }
}

struct StampDigest;

#[async_trait]
impl PhaseHandler for StampDigest {
    async fn handle(
        &self,
        _input: PhaseInput<'_>,
        ctx: &mut CallContext,
        mut response: PhaseResponse,
    ) -> Result<PhaseOutcome, HandlerError> {
        if let Some(digest) = ctx.get::<String>(DIGEST_KEY) {
            headers::add_header(response.header_mutation_mut(), DIGEST_HEADER, digest.clone());
        }
        Ok(PhaseOutcome::Continue(response))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info,ext_proc=debug").init();

    let service = ExtProcService::new("digest")
        .on(Phase::RequestHeaders, SeedDigest)
        .on(Phase::RequestBody, FeedDigest)
        .on(Phase::ResponseBody, StampDigest);

    ExtProcServer::new(service).serve().await?;
    Ok(())
}
