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

//! Builders for the message sequences Envoy would send, for driving the
//! dispatcher in tests without a proxy in front of it. Available to
//! downstream crates too; nothing in here depends on test-only tooling.

use extproc_api::envoy::config::core::v3::{HeaderMap, HeaderValue};
use extproc_api::envoy::service::ext_proc::v3::{
    processing_request, HttpBody, HttpHeaders, HttpTrailers, ProcessingRequest,
};
use futures::Stream;
use tonic::Status;

/// An Envoy header map from name/value pairs, values carried as
/// `raw_value` bytes the way Envoy sends them.
pub fn envoy_headers<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> HeaderMap
where
    N: Into<String>,
    V: Into<Vec<u8>>,
{
    HeaderMap {
        headers: pairs
            .into_iter()
            .map(|(name, value)| HeaderValue {
                key: name.into(),
                raw_value: value.into(),
                ..Default::default()
            })
            .collect(),
    }
}

fn message(request: processing_request::Request) -> ProcessingRequest {
    ProcessingRequest { request: Some(request), ..Default::default() }
}

pub fn request_headers_message(headers: HeaderMap, end_of_stream: bool) -> ProcessingRequest {
    message(processing_request::Request::RequestHeaders(HttpHeaders {
        headers: Some(headers),
        end_of_stream,
        ..Default::default()
    }))
}

pub fn request_body_message(body: impl Into<Vec<u8>>, end_of_stream: bool) -> ProcessingRequest {
    message(processing_request::Request::RequestBody(HttpBody {
        body: body.into(),
        end_of_stream,
    }))
}

pub fn request_trailers_message(trailers: HeaderMap) -> ProcessingRequest {
    message(processing_request::Request::RequestTrailers(HttpTrailers {
        trailers: Some(trailers),
    }))
}

pub fn response_headers_message(headers: HeaderMap, end_of_stream: bool) -> ProcessingRequest {
    message(processing_request::Request::ResponseHeaders(HttpHeaders {
        headers: Some(headers),
        end_of_stream,
        ..Default::default()
    }))
}

pub fn response_body_message(body: impl Into<Vec<u8>>, end_of_stream: bool) -> ProcessingRequest {
    message(processing_request::Request::ResponseBody(HttpBody {
        body: body.into(),
        end_of_stream,
    }))
}

pub fn response_trailers_message(trailers: HeaderMap) -> ProcessingRequest {
    message(processing_request::Request::ResponseTrailers(HttpTrailers {
        trailers: Some(trailers),
    }))
}

/// One full proxied HTTP exchange, rendered as the six messages Envoy
/// sends when every phase is configured for processing.
#[derive(Debug, Clone)]
pub struct Exchange {
    method: String,
    path: String,
    request_id: Option<String>,
    request_headers: Vec<(String, Vec<u8>)>,
    request_body: Vec<u8>,
    status: u16,
    response_headers: Vec<(String, Vec<u8>)>,
    response_body: Vec<u8>,
}

impl Exchange {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Exchange {
            method: method.into(),
            path: path.into(),
            request_id: None,
            request_headers: Vec::new(),
            request_body: Vec::new(),
            status: 200,
            response_headers: Vec::new(),
            response_body: Vec::new(),
        }
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.request_headers.push((name.into(), value.into()));
        self
    }

    pub fn request_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request_body = body.into();
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn response_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.response_headers.push((name.into(), value.into()));
        self
    }

    pub fn response_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.response_body = body.into();
        self
    }

    /// The six phase messages in wire order.
    pub fn messages(&self) -> Vec<ProcessingRequest> {
        let mut request_headers: Vec<(String, Vec<u8>)> = vec![
            (":method".to_owned(), self.method.clone().into_bytes()),
            (":path".to_owned(), self.path.clone().into_bytes()),
        ];
        if let Some(id) = &self.request_id {
            request_headers.push(("x-request-id".to_owned(), id.clone().into_bytes()));
        }
        request_headers.extend(self.request_headers.iter().cloned());

        let mut response_headers: Vec<(String, Vec<u8>)> = vec![
            (":status".to_owned(), self.status.to_string().into_bytes()),
            (
                "content-length".to_owned(),
                self.response_body.len().to_string().into_bytes(),
            ),
        ];
        response_headers.extend(self.response_headers.iter().cloned());

        vec![
            request_headers_message(envoy_headers(request_headers), self.request_body.is_empty()),
            request_body_message(self.request_body.clone(), true),
            request_trailers_message(HeaderMap::default()),
            response_headers_message(envoy_headers(response_headers), self.response_body.is_empty()),
            response_body_message(self.response_body.clone(), true),
            response_trailers_message(HeaderMap::default()),
        ]
    }

    /// The same sequence as a ready-to-dispatch inbound stream.
    pub fn stream(&self) -> impl Stream<Item = Result<ProcessingRequest, Status>> + Send {
        futures::stream::iter(self.messages().into_iter().map(Ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;

    #[test]
    fn exchange_renders_six_messages_in_wire_order() {
        let exchange = Exchange::new("POST", "/orders")
            .request_id("req-9")
            .header("content-type", "application/json")
            .request_body(r#"{"qty":1}"#)
            .status(201)
            .response_header("content-type", "application/json")
            .response_body(r#"{"id":7}"#);
        let messages = exchange.messages();
        assert_eq!(messages.len(), 6);
        let phases: Vec<Phase> = messages
            .iter()
            .map(|message| Phase::from_request(message).unwrap().0)
            .collect();
        assert_eq!(phases, Phase::ALL.to_vec());
    }

    #[test]
    fn request_headers_carry_pseudo_headers_and_id() {
        let messages = Exchange::new("GET", "/ping").request_id("abc").messages();
        let (_, input) = Phase::from_request(&messages[0]).unwrap();
        let map = input.headers().unwrap().headers.as_ref().unwrap();
        assert_eq!(crate::headers::get_header(map, ":method").as_deref(), Some("GET"));
        assert_eq!(crate::headers::get_header(map, ":path").as_deref(), Some("/ping"));
        assert_eq!(crate::headers::get_header(map, "x-request-id").as_deref(), Some("abc"));
    }

    #[test]
    fn empty_body_marks_headers_end_of_stream() {
        let messages = Exchange::new("GET", "/ping").messages();
        let (_, input) = Phase::from_request(&messages[0]).unwrap();
        assert!(input.headers().unwrap().end_of_stream);

        let messages = Exchange::new("POST", "/ping").request_body("x").messages();
        let (_, input) = Phase::from_request(&messages[0]).unwrap();
        assert!(!input.headers().unwrap().end_of_stream);
    }
}
