// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use havencommon::protocol::{
    AuthError as AuthErrorBody, Envelope, ErrorBody, Payload, RequestId, error_codes,
};
use thiserror::Error;

use crate::{auth::AuthError, errors::StoreError};

/// Failures of envelope dispatch. The connection layer converts these into
/// `Error` (or `AuthError`) envelopes echoing the offending request id and
/// closes the connection for the fatal ones.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Caller lacks permission: not a member, not an admin.
    #[error("Unauthorized")]
    Unauthorized,
    /// Requested entity does not exist.
    #[error("Not found")]
    NotFound,
    /// Malformed or semantically invalid payload.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    /// Envelope not permitted in the connection's current state.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    /// Per-connection quota exceeded.
    #[error("Rate limited")]
    RateLimited,
    /// An authentication ceremony or session validation failed.
    #[error("Authentication failed: {0}")]
    AuthFailed(AuthError),
    /// The connection's outbound queue is gone; tear down silently.
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for RouterError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => RouterError::NotFound,
            StoreError::Conflict => RouterError::InvalidPayload("already exists".to_owned()),
            StoreError::Storage(e) => RouterError::Internal(e.to_string()),
        }
    }
}

impl RouterError {
    /// Whether the server closes the connection after reporting the error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RouterError::ProtocolViolation(_) | RouterError::ConnectionClosed
        )
    }

    /// The wire representation, echoing the offending request id. `None`
    /// when there is nothing useful to send (the connection is gone).
    pub fn to_envelope(&self, request_id: RequestId) -> Option<Envelope> {
        let payload = match self {
            RouterError::ConnectionClosed => return None,
            RouterError::AuthFailed(e) => {
                // Infrastructure details never cross the wire.
                let message = match e {
                    AuthError::Store(_) | AuthError::Serde(_) | AuthError::Configuration(_) => {
                        "authentication failed".to_owned()
                    }
                    other => other.to_string(),
                };
                Payload::AuthError(AuthErrorBody {
                    code: error_codes::UNAUTHENTICATED,
                    message,
                })
            }
            RouterError::Unauthorized => Payload::Error(ErrorBody {
                code: error_codes::UNAUTHORIZED,
                message: self.to_string(),
                fatal: false,
            }),
            RouterError::NotFound => Payload::Error(ErrorBody {
                code: error_codes::NOT_FOUND,
                message: self.to_string(),
                fatal: false,
            }),
            RouterError::RateLimited => Payload::Error(ErrorBody {
                code: error_codes::RATE_LIMITED,
                message: self.to_string(),
                fatal: false,
            }),
            RouterError::InvalidPayload(_) => Payload::Error(ErrorBody {
                code: error_codes::INVALID_PAYLOAD,
                message: self.to_string(),
                fatal: false,
            }),
            RouterError::ProtocolViolation(_) => Payload::Error(ErrorBody {
                code: error_codes::INVALID_PAYLOAD,
                message: self.to_string(),
                fatal: true,
            }),
            // Internal details never cross the wire.
            RouterError::Internal(_) => Payload::Error(ErrorBody {
                code: error_codes::INTERNAL,
                message: "internal error".to_owned(),
                fatal: false,
            }),
        };
        Some(Envelope::response(request_id, payload))
    }
}
