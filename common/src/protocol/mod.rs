// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The framed wire protocol.
//!
//! Every frame on the transport carries exactly one [`Envelope`]:
//!
//! ```text
//! [u16 type, big endian][u8 request id length][request id][payload body]
//! ```
//!
//! The payload body is encoded with the versioned codec from
//! [`crate::codec`]. The type discriminator values are stable across
//! versions; decoding maps them through a single registry to the typed
//! payload. The server never interprets the `Vec<u8>` fields of messaging,
//! group and key-distribution payloads.

use thiserror::Error;

use crate::codec;

mod payloads;

pub use payloads::*;

/// Maximum length of a client-generated correlation identifier.
pub const MAX_REQUEST_ID_LEN: usize = 64;

/// Smallest number of bytes a well-formed envelope can occupy.
const ENVELOPE_HEADER_LEN: usize = 3;

pub mod error_codes {
    //! Wire error codes carried by [`super::ErrorBody`].

    /// Caller lacks permission for the operation.
    pub const UNAUTHORIZED: u32 = 4001;
    /// A valid session is required and absent, expired or rejected.
    pub const UNAUTHENTICATED: u32 = 4003;
    /// The requested entity does not exist.
    pub const NOT_FOUND: u32 = 4004;
    /// Per-connection quota exceeded; the offending envelope was dropped.
    pub const RATE_LIMITED: u32 = 4290;
    /// Unexpected server-side failure.
    pub const INTERNAL: u32 = 5000;
    /// Malformed input: invalid envelope, wrong state or bad payload.
    pub const INVALID_PAYLOAD: u32 = 5001;
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Envelope too short")]
    Truncated,
    #[error("Unknown envelope type {0}")]
    UnknownType(u16),
    #[error("Request id of {0} bytes exceeds the {MAX_REQUEST_ID_LEN} byte bound")]
    RequestIdTooLong(usize),
    #[error("Payload body: {0}")]
    Body(#[from] codec::Error),
}

/// The closed set of envelope type discriminators. Values are part of the
/// wire contract and never reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EnvelopeType {
    AuthRequest = 1,
    AuthChallenge = 2,
    AuthResponse = 3,
    AuthSuccess = 4,
    AuthError = 5,
    AuthRegisterRequest = 6,
    AuthRegisterChallenge = 7,
    AuthRegisterResponse = 8,
    AuthRegisterSuccess = 9,

    MessageSend = 20,
    MessageReceive = 21,
    MessageAck = 22,
    MessageDelivered = 23,

    GroupCreate = 30,
    GroupCreated = 31,
    GroupInvite = 32,
    GroupMemberAdded = 33,
    GroupMemberRemoved = 34,
    GroupLeave = 35,

    KeyPackageUpload = 40,
    KeyPackageFetch = 41,
    KeyPackageResponse = 42,
    Welcome = 43,
    WelcomeReceive = 44,
    Commit = 45,
    CommitBroadcast = 46,

    PresenceQuery = 50,
    PresenceStatus = 51,

    Ping = 60,
    Pong = 61,

    Error = 62,
}

impl TryFrom<u16> for EnvelopeType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, ProtocolError> {
        use EnvelopeType::*;
        let envelope_type = match value {
            1 => AuthRequest,
            2 => AuthChallenge,
            3 => AuthResponse,
            4 => AuthSuccess,
            5 => AuthError,
            6 => AuthRegisterRequest,
            7 => AuthRegisterChallenge,
            8 => AuthRegisterResponse,
            9 => AuthRegisterSuccess,
            20 => MessageSend,
            21 => MessageReceive,
            22 => MessageAck,
            23 => MessageDelivered,
            30 => GroupCreate,
            31 => GroupCreated,
            32 => GroupInvite,
            33 => GroupMemberAdded,
            34 => GroupMemberRemoved,
            35 => GroupLeave,
            40 => KeyPackageUpload,
            41 => KeyPackageFetch,
            42 => KeyPackageResponse,
            43 => Welcome,
            44 => WelcomeReceive,
            45 => Commit,
            46 => CommitBroadcast,
            50 => PresenceQuery,
            51 => PresenceStatus,
            60 => Ping,
            61 => Pong,
            62 => Error,
            other => return Err(ProtocolError::UnknownType(other)),
        };
        Ok(envelope_type)
    }
}

/// Client-generated correlation token, echoed by the server on responses and
/// empty on server-initiated pushes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestId(Vec<u8>);

impl RequestId {
    pub fn new(bytes: Vec<u8>) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_REQUEST_ID_LEN {
            return Err(ProtocolError::RequestIdTooLong(bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// The empty request id used for server-initiated pushes.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub request_id: RequestId,
    pub payload: Payload,
}

impl Envelope {
    /// An envelope answering the request identified by `request_id`.
    pub fn response(request_id: RequestId, payload: Payload) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    /// A server-initiated push with an empty request id.
    pub fn push(payload: Payload) -> Self {
        Self {
            request_id: RequestId::none(),
            payload,
        }
    }

    pub fn envelope_type(&self) -> EnvelopeType {
        self.payload.envelope_type()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = self.payload.encode_body()?;
        let request_id = self.request_id.as_bytes();
        let mut frame = Vec::with_capacity(ENVELOPE_HEADER_LEN + request_id.len() + body.len());
        frame.extend_from_slice(&(self.envelope_type() as u16).to_be_bytes());
        frame.push(request_id.len() as u8);
        frame.extend_from_slice(request_id);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < ENVELOPE_HEADER_LEN {
            return Err(ProtocolError::Truncated);
        }
        let envelope_type = EnvelopeType::try_from(u16::from_be_bytes([bytes[0], bytes[1]]))?;
        let request_id_len = bytes[2] as usize;
        if request_id_len > MAX_REQUEST_ID_LEN {
            return Err(ProtocolError::RequestIdTooLong(request_id_len));
        }
        let body_start = ENVELOPE_HEADER_LEN + request_id_len;
        if bytes.len() < body_start {
            return Err(ProtocolError::Truncated);
        }
        let request_id = RequestId::new(bytes[ENVELOPE_HEADER_LEN..body_start].to_vec())?;
        let payload = Payload::decode_body(envelope_type, &bytes[body_start..])?;
        Ok(Self {
            request_id,
            payload,
        })
    }
}

#[cfg(test)]
mod tests;
