// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Versioned serde codec used for envelope payload bodies and for blobs the
//! store persists (ceremony state, stored credentials).
//!
//! Every encoding leads with one version byte naming the codec that
//! produced the rest, so stored blobs stay readable across format
//! migrations instead of having to be guessed at.

use serde::{Serialize, de::DeserializeOwned};

mod error;

pub use error::Error;
use error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
#[non_exhaustive]
pub enum PersistenceCodec {
    #[default]
    V1 = 1,
}

impl TryFrom<u8> for PersistenceCodec {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PersistenceCodec::V1),
            other => Err(Error::UnknownVersion(other)),
        }
    }
}

impl PersistenceCodec {
    /// Encodes with the current codec version. New data is always written
    /// in the newest format.
    pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, Error>
    where
        T: Sized + Serialize,
    {
        let version = PersistenceCodec::default();
        let mut buf = vec![version as u8];
        match version {
            PersistenceCodec::V1 => {
                ciborium::ser::into_writer(value, &mut buf).map_err(|e| CodecError {
                    version,
                    cause: Box::new(e),
                })?;
            }
        }
        Ok(buf)
    }

    /// Decodes by dispatching on the leading version byte.
    pub fn from_slice<T>(bytes: &[u8]) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let (version_byte, body) = bytes.split_first().ok_or(Error::Empty)?;
        let version = PersistenceCodec::try_from(*version_byte)?;
        let value = match version {
            PersistenceCodec::V1 => {
                ciborium::de::from_reader(body).map_err(|e| CodecError {
                    version,
                    cause: Box::new(e),
                })?
            }
        };
        Ok(value)
    }
}

/// Convenience alias matching the call sites: `codec::to_vec(&value)`.
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    PersistenceCodec::to_vec(value)
}

pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    PersistenceCodec::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        label: String,
        payload: Vec<u8>,
    }

    #[test]
    fn round_trip() {
        let probe = Probe {
            label: "probe".to_owned(),
            payload: vec![1, 2, 3],
        };
        let bytes = to_vec(&probe).unwrap();
        assert_eq!(bytes[0], PersistenceCodec::V1 as u8);
        let decoded: Probe = from_slice(&bytes).unwrap();
        assert_eq!(decoded, probe);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(from_slice::<Probe>(&[]), Err(Error::Empty)));
    }

    #[test]
    fn unknown_version_is_rejected() {
        assert!(matches!(
            from_slice::<Probe>(&[0x7f, 0x00]),
            Err(Error::UnknownVersion(0x7f))
        ));
    }

    #[test]
    fn truncated_body_is_a_codec_error() {
        let probe = Probe {
            label: "probe".to_owned(),
            payload: vec![1, 2, 3],
        };
        let bytes = to_vec(&probe).unwrap();
        assert!(matches!(
            from_slice::<Probe>(&bytes[..bytes.len() - 1]),
            Err(Error::Body(_))
        ));
    }
}
