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

use thiserror::Error;
use tonic::Status;

use crate::phase::Phase;

/// Error surface a handler may return. The dispatcher wraps it into
/// [`ExtProcError::HandlerFailure`] and aborts the stream.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Failures that abort an ext_proc stream. Early exit is not an error;
/// it travels as [`crate::handler::PhaseOutcome::Stop`].
#[derive(Debug, Error)]
pub enum ExtProcError {
    /// The peer sent a message the protocol does not allow here.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// Strict phase coverage is on and no handler covers this phase.
    #[error("no handler registered for phase {0}")]
    HandlerUnavailable(Phase),
    /// A handler returned an error.
    #[error("handler failed in phase {phase}: {source}")]
    HandlerFailure {
        phase: Phase,
        #[source]
        source: HandlerError,
    },
}

impl From<ExtProcError> for Status {
    fn from(err: ExtProcError) -> Self {
        match &err {
            ExtProcError::ProtocolViolation(_) => Status::invalid_argument(err.to_string()),
            ExtProcError::HandlerUnavailable(_) => Status::unimplemented(err.to_string()),
            ExtProcError::HandlerFailure { .. } => Status::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn error_kinds_map_to_grpc_codes() {
        let violation: Status = ExtProcError::ProtocolViolation("bad oneof".to_owned()).into();
        assert_eq!(violation.code(), Code::InvalidArgument);

        let uncovered: Status = ExtProcError::HandlerUnavailable(Phase::RequestBody).into();
        assert_eq!(uncovered.code(), Code::Unimplemented);
        assert!(uncovered.message().contains("request_body"));

        let failed: Status = ExtProcError::HandlerFailure {
            phase: Phase::ResponseHeaders,
            source: "boom".into(),
        }
        .into();
        assert_eq!(failed.code(), Code::Internal);
    }
}
