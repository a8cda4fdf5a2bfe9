// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;

use super::PersistenceCodec;

#[derive(Debug, Error)]
pub enum Error {
    /// Nothing to decode, not even a version byte.
    #[error("Empty encoding")]
    Empty,
    /// The leading byte names no codec this build knows.
    #[error("Unknown codec version {0}")]
    UnknownVersion(u8),
    #[error(transparent)]
    Body(#[from] CodecError),
}

/// A body that failed to encode or decode under a known codec version.
#[derive(Debug, Error)]
#[error("{version:?} body: {cause}")]
pub struct CodecError {
    pub(super) version: PersistenceCodec,
    pub(super) cause: Box<dyn std::error::Error + Send + Sync + 'static>,
}
