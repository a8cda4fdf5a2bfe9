// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;

use crate::errors::StoreError;

/// Authentication failures surfaced to clients. Variants map 1:1 onto the
/// externally visible outcomes; storage failures stay internal.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Registration failed")]
    RegistrationFailed,
    #[error("Challenge not found")]
    ChallengeNotFound,
    #[error("Challenge expired")]
    ChallengeExpired,
    #[error("Session expired")]
    SessionExpired,
    #[error("Account disabled")]
    AccountDisabled,
    #[error("User not found")]
    UserNotFound,
    /// Signature counter regression: the authenticator may have been cloned.
    #[error("Clone detected")]
    CloneDetected,
    #[error("Invalid credential")]
    InvalidCredential,
    #[error("Invalid relying party configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<havencommon::codec::Error> for AuthError {
    fn from(e: havencommon::codec::Error) -> Self {
        AuthError::Store(e.into())
    }
}
