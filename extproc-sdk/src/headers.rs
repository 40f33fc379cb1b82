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

//! Pure helpers over the Envoy header collections and response shapes.
//!
//! Envoy encodes header values either as a UTF-8 `value` string or as
//! `raw_value` bytes; these helpers accept both and present text, lossily
//! for non-UTF-8 raw values. Lookups are case-insensitive by default
//! (Envoy lower-cases keys on the wire, but nothing forces other ext_proc
//! peers to); the `_exact` variants skip the case folding for names known
//! to be lower-cased already.

use std::borrow::Cow;

use extproc_api::envoy::config::core::v3::{
    header_value_option::HeaderAppendAction, HeaderMap, HeaderValue, HeaderValueOption,
};
use extproc_api::envoy::r#type::v3::HttpStatus;
use extproc_api::envoy::service::ext_proc::v3::{HeaderMutation, ImmediateResponse};

/// Text form of one Envoy header value.
pub fn header_text(header: &HeaderValue) -> Cow<'_, str> {
    if header.raw_value.is_empty() {
        Cow::Borrowed(header.value.as_str())
    } else {
        String::from_utf8_lossy(&header.raw_value)
    }
}

/// First value of `name`, compared case-insensitively.
pub fn get_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<Cow<'a, str>> {
    headers
        .headers
        .iter()
        .find(|header| header.key.eq_ignore_ascii_case(name))
        .map(header_text)
}

/// First value of `name`, compared byte-for-byte. Only correct when the
/// caller knows `name` matches the wire casing.
pub fn get_header_exact<'a>(headers: &'a HeaderMap, name: &str) -> Option<Cow<'a, str>> {
    headers.headers.iter().find(|header| header.key == name).map(header_text)
}

/// Values for several names in one pass over the map. The result aligns
/// with `names`; absent headers yield `None`, duplicates keep the first
/// occurrence.
pub fn get_headers<'a>(headers: &'a HeaderMap, names: &[&str]) -> Vec<Option<Cow<'a, str>>> {
    let mut values: Vec<Option<Cow<'a, str>>> = vec![None; names.len()];
    for header in &headers.headers {
        for (slot, name) in names.iter().enumerate() {
            if values[slot].is_none() && header.key.eq_ignore_ascii_case(name) {
                values[slot] = Some(header_text(header));
            }
        }
    }
    values
}

/// Adds a set-header instruction, overwriting any existing value.
pub fn add_header(mutation: &mut HeaderMutation, name: impl Into<String>, value: impl Into<Vec<u8>>) {
    mutation.set_headers.push(HeaderValueOption {
        header: Some(HeaderValue {
            key: name.into(),
            raw_value: value.into(),
            ..Default::default()
        }),
        append_action: HeaderAppendAction::OverwriteIfExistsOrAdd as i32,
        ..Default::default()
    });
}

pub fn add_headers<N, V>(mutation: &mut HeaderMutation, pairs: impl IntoIterator<Item = (N, V)>)
where
    N: Into<String>,
    V: Into<Vec<u8>>,
{
    for (name, value) in pairs {
        add_header(mutation, name, value);
    }
}

/// Adds a remove-header instruction.
pub fn remove_header(mutation: &mut HeaderMutation, name: impl Into<String>) {
    mutation.remove_headers.push(name.into());
}

pub fn remove_headers<N>(mutation: &mut HeaderMutation, names: impl IntoIterator<Item = N>)
where
    N: Into<String>,
{
    for name in names {
        remove_header(mutation, name);
    }
}

/// Builds an [`ImmediateResponse`] that short-circuits the exchange with
/// `status`, optional extra headers, and a body.
pub fn immediate_response<N, V>(
    status: http::StatusCode,
    headers: impl IntoIterator<Item = (N, V)>,
    body: impl Into<Vec<u8>>,
) -> ImmediateResponse
where
    N: Into<String>,
    V: Into<Vec<u8>>,
{
    let mut mutation = HeaderMutation::default();
    add_headers(&mut mutation, headers);
    ImmediateResponse {
        status: Some(HttpStatus { code: i32::from(status.as_u16()) }),
        headers: Some(mutation),
        body: body.into(),
        grpc_status: None,
        details: String::new(),
    }
}
