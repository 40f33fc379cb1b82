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

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;

use extproc_api::envoy::service::ext_proc::v3::HttpHeaders;

use crate::headers;
use crate::phase::Phase;

/// Per-stream state, owned by the dispatcher and handed to handlers as
/// `&mut`. It never outlives its stream and is never shared across
/// streams.
///
/// The well-known fields are maintained by the dispatcher: the current
/// phase, a best-effort request id taken from `x-request-id`, and the
/// standard header set extracted on the two headers phases. Handlers park
/// their own cross-phase values in the typed side-table.
#[derive(Debug, Default)]
pub struct CallContext {
    /// Phase of the message currently being dispatched.
    pub phase: Option<Phase>,
    /// `x-request-id` seen on the request headers, if any.
    pub request_id: Option<String>,
    /// `:method` of the downstream request.
    pub method: Option<String>,
    /// `:path` of the downstream request.
    pub path: Option<String>,
    /// `content-type`, refreshed on the response-headers phase.
    pub content_type: Option<String>,
    /// `content-length` when parseable, refreshed on the
    /// response-headers phase.
    pub content_length: Option<u64>,
    /// Accumulated handler wall time for this stream, in nanoseconds.
    pub overhead_ns: u128,
    values: HashMap<String, Box<dyn Any + Send>>,
}

impl CallContext {
    pub fn new() -> Self {
        CallContext::default()
    }

    /// Typed read of a handler-defined value.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|value| value.downcast_ref())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|value| value.downcast_mut())
    }

    /// Stores a handler-defined value, replacing any previous one under
    /// the same key regardless of its type.
    pub fn insert<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Removes and returns a value if it exists under `key` with type `T`.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        let value = self.values.remove(key)?;
        match value.downcast::<T>() {
            Ok(boxed) => Some(*boxed),
            Err(other) => {
                // Wrong type requested: put it back untouched.
                self.values.insert(key.to_owned(), other);
                None
            },
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Extracts the standard header set for a headers phase. Idempotent:
    /// re-running over the same message yields the same context.
    pub(crate) fn absorb_headers(&mut self, phase: Phase, message: &HttpHeaders) {
        let Some(map) = message.headers.as_ref() else { return };
        match phase {
            Phase::RequestHeaders => {
                let mut values = headers::get_headers(
                    map,
                    &[":method", ":path", "content-type", "content-length", "x-request-id"],
                );
                self.method = values[0].take().map(Cow::into_owned);
                self.path = values[1].take().map(Cow::into_owned);
                self.content_type = values[2].take().map(Cow::into_owned);
                self.content_length = values[3].take().and_then(|length| length.parse().ok());
                self.request_id = values[4].take().map(Cow::into_owned);
            },
            Phase::ResponseHeaders => {
                let mut values = headers::get_headers(map, &["content-type", "content-length"]);
                if let Some(content_type) = values[0].take() {
                    self.content_type = Some(content_type.into_owned());
                }
                self.content_length =
                    values[1].take().and_then(|length| length.parse().ok());
            },
            _ => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extproc_api::envoy::config::core::v3::{HeaderMap, HeaderValue};

    fn headers_message(pairs: &[(&str, &str)]) -> HttpHeaders {
        HttpHeaders {
            headers: Some(HeaderMap {
                headers: pairs
                    .iter()
                    .map(|(key, value)| HeaderValue {
                        key: (*key).to_owned(),
                        value: (*value).to_owned(),
                        ..Default::default()
                    })
                    .collect(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn typed_side_table_roundtrip() {
        let mut ctx = CallContext::new();
        ctx.insert("count", 3_u32);
        assert_eq!(ctx.get::<u32>("count"), Some(&3));
        assert_eq!(ctx.get::<String>("count"), None);
        *ctx.get_mut::<u32>("count").unwrap() += 1;
        assert_eq!(ctx.remove::<u32>("count"), Some(4));
        assert!(!ctx.contains("count"));
    }

    #[test]
    fn remove_with_wrong_type_keeps_the_value() {
        let mut ctx = CallContext::new();
        ctx.insert("tag", "hello".to_owned());
        assert_eq!(ctx.remove::<u64>("tag"), None);
        assert_eq!(ctx.get::<String>("tag").map(String::as_str), Some("hello"));
    }

    #[test]
    fn insert_replaces_across_types() {
        let mut ctx = CallContext::new();
        ctx.insert("slot", 1_u8);
        ctx.insert("slot", "two".to_owned());
        assert_eq!(ctx.get::<u8>("slot"), None);
        assert_eq!(ctx.get::<String>("slot").map(String::as_str), Some("two"));
    }

    #[test]
    fn request_headers_populate_the_standard_fields() {
        let mut ctx = CallContext::new();
        let message = headers_message(&[
            (":method", "POST"),
            (":path", "/v1/echo"),
            ("Content-Type", "application/json"),
            ("Content-Length", "18"),
            ("x-request-id", "abc-123"),
        ]);
        ctx.absorb_headers(Phase::RequestHeaders, &message);
        assert_eq!(ctx.method.as_deref(), Some("POST"));
        assert_eq!(ctx.path.as_deref(), Some("/v1/echo"));
        assert_eq!(ctx.content_type.as_deref(), Some("application/json"));
        assert_eq!(ctx.content_length, Some(18));
        assert_eq!(ctx.request_id.as_deref(), Some("abc-123"));

        // Extraction is idempotent.
        ctx.absorb_headers(Phase::RequestHeaders, &message);
        assert_eq!(ctx.request_id.as_deref(), Some("abc-123"));
    }

    #[test]
    fn response_headers_refresh_content_fields() {
        let mut ctx = CallContext::new();
        ctx.absorb_headers(
            Phase::RequestHeaders,
            &headers_message(&[("content-type", "application/json")]),
        );
        ctx.absorb_headers(
            Phase::ResponseHeaders,
            &headers_message(&[("content-type", "text/plain"), ("content-length", "42")]),
        );
        assert_eq!(ctx.content_type.as_deref(), Some("text/plain"));
        assert_eq!(ctx.content_length, Some(42));
    }

    #[test]
    fn unparseable_content_length_is_dropped() {
        let mut ctx = CallContext::new();
        ctx.absorb_headers(
            Phase::ResponseHeaders,
            &headers_message(&[("content-length", "not-a-number")]),
        );
        assert_eq!(ctx.content_length, None);
    }
}
