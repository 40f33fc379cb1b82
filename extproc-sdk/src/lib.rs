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

//! SDK for building Envoy external processors.
//!
//! Envoy's ext_proc filter opens one bidirectional gRPC stream per proxied
//! HTTP exchange and walks it through up to six phases: request headers,
//! request body, request trailers, then the same three on the response
//! path. This crate implements the streaming contract once; a processor is
//! an [`ExtProcService`] with a [`PhaseHandler`] per phase it cares about.
//!
//! ```no_run
//! use extproc_sdk::{ExtProcServer, ExtProcService, Phase, PhaseOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ExtProcService::new("stamp").on_fn(
//!         Phase::RequestHeaders,
//!         |_input, _ctx, mut response| {
//!             extproc_sdk::headers::add_header(
//!                 response.header_mutation_mut(),
//!                 "x-stamped",
//!                 "true",
//!             );
//!             Ok(PhaseOutcome::Continue(response))
//!         },
//!     );
//!     ExtProcServer::new(service).serve().await?;
//!     Ok(())
//! }
//! ```
//!
//! Handlers share a per-stream [`CallContext`]; a handler may end the
//! exchange early by returning [`PhaseOutcome::Stop`] with an
//! `ImmediateResponse`. Phases without a handler continue unchanged.

pub use extproc_api as api;

pub mod context;
pub mod error;
pub mod handler;
pub mod headers;
pub mod phase;
pub mod server;
pub mod service;
pub mod testing;
pub mod timer;

pub use context::CallContext;
pub use error::{ExtProcError, HandlerError};
pub use handler::{handler_fn, HandlerRegistry, PhaseHandler, PhaseOutcome};
pub use phase::{Phase, PhaseInput, PhaseResponse};
pub use server::{ExtProcServer, ServeError, ServerConfig, DEFAULT_GRACE_PERIOD, DEFAULT_PORT};
pub use service::{ExtProcService, EXTPROCS_APPLIED_HEADER};
pub use timer::Timer;
