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

//! The built-in processors this binary can host.

use async_trait::async_trait;
use extproc_sdk::{
    headers, CallContext, ExtProcService, HandlerError, Phase, PhaseHandler, PhaseInput,
    PhaseOutcome, PhaseResponse,
};
use sha2::{Digest, Sha256};

/// A processor that answers every phase with continue-unchanged. Useful
/// for measuring the cost of having the filter in the chain at all.
pub fn noop() -> ExtProcService {
    ExtProcService::new("noop")
}

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

/// Echoes the Envoy request id back as `x-extra-request-id`, both to the
/// upstream and to the caller.
pub fn trivial() -> ExtProcService {
    ExtProcService::new("trivial")
        .on_fn(Phase::RequestHeaders, stamp_extra_request_id)
        .on_fn(Phase::ResponseHeaders, stamp_extra_request_id)
}

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
            .unwrap_or(std::borrow::Cow::Borrowed("unknown"));

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

/// Hashes tenant, method, path, and request body and stamps the running
/// hex digest as `x-request-digest` on the way upstream (request headers
/// for GETs, each body chunk otherwise) and again on the response body.
pub fn digest() -> ExtProcService {
    ExtProcService::new("digest")
        .on(Phase::RequestHeaders, SeedDigest)
        .on(Phase::RequestBody, FeedDigest)
        .on(Phase::ResponseBody, StampDigest)
}

/// Answers every request itself with a plain-text echo of what arrived.
pub fn echo() -> ExtProcService {
    ExtProcService::new("echo")
        .on_fn(Phase::RequestHeaders, |input, ctx, response| {
            let message = input.headers().ok_or("expected a headers phase")?;
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
            match ctx.get_mut::<Vec<u8>>("echo.body") {
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
        })
}

#[cfg(test)]
mod tests {
    use extproc_sdk::api::envoy::service::ext_proc::v3::processing_response::Response;
    use extproc_sdk::api::envoy::service::ext_proc::v3::ProcessingResponse;
    use extproc_sdk::api::tonic::Status;
    use extproc_sdk::testing::Exchange;
    use futures::StreamExt;

    use super::*;

    fn set_header_value(
        response: &Result<ProcessingResponse, Status>,
        name: &str,
    ) -> Option<Vec<u8>> {
        let common = match response.as_ref().ok()?.response.as_ref()? {
            Response::RequestHeaders(message) => message.response.as_ref(),
            Response::ResponseHeaders(message) => message.response.as_ref(),
            Response::RequestBody(message) => message.response.as_ref(),
            Response::ResponseBody(message) => message.response.as_ref(),
            _ => None,
        }?;
        common
            .header_mutation
            .as_ref()?
            .set_headers
            .iter()
            .find(|option| option.header.as_ref().is_some_and(|header| header.key == name))
            .and_then(|option| option.header.as_ref())
            .map(|header| header.raw_value.clone())
    }

    #[tokio::test]
    async fn trivial_echoes_the_request_id_on_both_sides() {
        let service = trivial();
        let exchange = Exchange::new("GET", "/ping").request_id("req-42");
        let responses: Vec<_> = service.process_stream(exchange.stream()).collect().await;
        assert_eq!(responses.len(), 6);

        let expected = b"req-42".as_slice();
        assert_eq!(set_header_value(&responses[0], "x-extra-request-id").as_deref(), Some(expected));
        assert_eq!(set_header_value(&responses[3], "x-extra-request-id").as_deref(), Some(expected));
    }

    #[tokio::test]
    async fn digest_get_stamps_the_request_headers_response() {
        let service = digest();
        let responses: Vec<_> =
            service.process_stream(Exchange::new("GET", "/x").stream()).collect().await;
        assert_eq!(responses.len(), 6);

        let expected = hex::encode(Sha256::digest(b"unknownGET/x"));
        assert_eq!(
            set_header_value(&responses[0], DIGEST_HEADER).as_deref(),
            Some(expected.as_bytes()),
            "a GET has no guaranteed body, so the headers response must carry the digest",
        );
        // The empty body phase re-stamps the unchanged digest.
        assert_eq!(set_header_value(&responses[1], DIGEST_HEADER).as_deref(), Some(expected.as_bytes()));
        assert_eq!(set_header_value(&responses[4], DIGEST_HEADER).as_deref(), Some(expected.as_bytes()));
    }

    #[tokio::test]
    async fn digest_folds_in_tenant_and_request_body() {
        let service = digest();
        let exchange = Exchange::new("POST", "/orders")
            .header(TENANT_HEADER, "acme")
            .request_body(r#"{"qty":2}"#);
        let responses: Vec<_> = service.process_stream(exchange.stream()).collect().await;
        assert_eq!(responses.len(), 6);

        assert_eq!(
            set_header_value(&responses[0], DIGEST_HEADER),
            None,
            "non-GET requests are stamped once the body has been hashed",
        );
        let expected = hex::encode(Sha256::digest(br#"acmePOST/orders{"qty":2}"#));
        assert_eq!(set_header_value(&responses[1], DIGEST_HEADER).as_deref(), Some(expected.as_bytes()));
        assert_eq!(set_header_value(&responses[4], DIGEST_HEADER).as_deref(), Some(expected.as_bytes()));
    }

    #[tokio::test]
    async fn echo_processor_short_circuits_with_the_request_body() {
        let service = echo();
        let exchange = Exchange::new("POST", "/say").request_body("hello");
        let responses: Vec<_> = service.process_stream(exchange.stream()).collect().await;
        assert_eq!(responses.len(), 2);

        let Response::ImmediateResponse(immediate) =
            responses[1].as_ref().unwrap().response.as_ref().unwrap()
        else {
            panic!("expected immediate response");
        };
        assert_eq!(immediate.status.as_ref().unwrap().code, 200);
        assert_eq!(immediate.body, b"POST /say\nhello");
    }
}
