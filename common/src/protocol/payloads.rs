// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed payload bodies, one per envelope type.
//!
//! Byte fields of messaging, group and key-distribution payloads are opaque
//! ciphertext or client-produced artifacts; the server routes them without
//! interpretation.

use serde::{Deserialize, Serialize};

use crate::{
    codec,
    identifiers::{ConversationId, MessageId, UserId},
};

use super::{EnvelopeType, ProtocolError};

/// The payload kind a message row carries. `Application` payloads are
/// end-to-end ciphertext; the other kinds are group-management artifacts the
/// clients persist through the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MessageKind {
    Application,
    Commit,
    Welcome,
    Proposal,
}

/// Per-recipient delivery state machine: pending → delivered → read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum DeliveryStatus {
    Pending = 0,
    Delivered = 1,
    Read = 2,
}

// === Authentication ===

/// Either resumes an existing session (token set) or begins a login
/// ceremony for `username`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub username: Option<String>,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthChallenge {
    pub challenge_id: String,
    /// Ceremony request options, JSON as produced by the credential library.
    #[serde(with = "serde_bytes")]
    pub request_options: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub challenge_id: String,
    /// The signed assertion, JSON as produced by the client authenticator.
    #[serde(with = "serde_bytes")]
    pub credential: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSuccess {
    /// Fresh session token after a login ceremony; `None` on session resume.
    pub session_token: Option<String>,
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthError {
    pub code: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRegisterRequest {
    pub username: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRegisterChallenge {
    pub challenge_id: String,
    /// Ceremony creation options, JSON as produced by the credential library.
    #[serde(with = "serde_bytes")]
    pub creation_options: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRegisterResponse {
    pub challenge_id: String,
    #[serde(with = "serde_bytes")]
    pub credential: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRegisterSuccess {
    pub session_token: String,
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
}

// === Messaging ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSend {
    pub conversation_id: ConversationId,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub message_type: MessageKind,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReceive {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// Canonical server-assigned ordering timestamp, unix microseconds.
    pub server_timestamp: i64,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub message_type: MessageKind,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAck {
    pub message_id: MessageId,
    /// The delivery level the recipient reached; `Pending` is not a valid
    /// acknowledgement.
    pub status: DeliveryStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelivered {
    pub message_id: MessageId,
    pub delivered_to: UserId,
    pub status: DeliveryStatus,
}

// === Group management ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCreate {
    pub title: String,
    pub member_ids: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCreated {
    pub conversation_id: ConversationId,
    pub title: String,
    pub members: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInvite {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMemberAdded {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub added_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMemberRemoved {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupLeave {
    pub conversation_id: ConversationId,
}

// === Key distribution ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPackageUpload {
    #[serde(with = "serde_bytes")]
    pub key_package: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPackageFetch {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPackageResponse {
    pub user_id: UserId,
    #[serde(with = "serde_bytes")]
    pub key_package: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    pub conversation_id: ConversationId,
    pub recipient_id: UserId,
    #[serde(with = "serde_bytes")]
    pub welcome: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeReceive {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(with = "serde_bytes")]
    pub welcome: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub conversation_id: ConversationId,
    #[serde(with = "serde_bytes")]
    pub commit: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitBroadcast {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(with = "serde_bytes")]
    pub commit: Vec<u8>,
}

// === Presence ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceQuery {
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub entries: Vec<PresenceEntry>,
}

// === Heartbeat and errors ===

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u32,
    pub message: String,
    /// When set, the server closes the connection after sending.
    pub fatal: bool,
}

/// The typed payload of an [`super::Envelope`], one variant per discriminator.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    AuthRequest(AuthRequest),
    AuthChallenge(AuthChallenge),
    AuthResponse(AuthResponse),
    AuthSuccess(AuthSuccess),
    AuthError(AuthError),
    AuthRegisterRequest(AuthRegisterRequest),
    AuthRegisterChallenge(AuthRegisterChallenge),
    AuthRegisterResponse(AuthRegisterResponse),
    AuthRegisterSuccess(AuthRegisterSuccess),
    MessageSend(MessageSend),
    MessageReceive(MessageReceive),
    MessageAck(MessageAck),
    MessageDelivered(MessageDelivered),
    GroupCreate(GroupCreate),
    GroupCreated(GroupCreated),
    GroupInvite(GroupInvite),
    GroupMemberAdded(GroupMemberAdded),
    GroupMemberRemoved(GroupMemberRemoved),
    GroupLeave(GroupLeave),
    KeyPackageUpload(KeyPackageUpload),
    KeyPackageFetch(KeyPackageFetch),
    KeyPackageResponse(KeyPackageResponse),
    Welcome(Welcome),
    WelcomeReceive(WelcomeReceive),
    Commit(Commit),
    CommitBroadcast(CommitBroadcast),
    PresenceQuery(PresenceQuery),
    PresenceStatus(PresenceStatus),
    Ping(Ping),
    Pong(Pong),
    Error(ErrorBody),
}

impl Payload {
    pub fn envelope_type(&self) -> EnvelopeType {
        match self {
            Payload::AuthRequest(_) => EnvelopeType::AuthRequest,
            Payload::AuthChallenge(_) => EnvelopeType::AuthChallenge,
            Payload::AuthResponse(_) => EnvelopeType::AuthResponse,
            Payload::AuthSuccess(_) => EnvelopeType::AuthSuccess,
            Payload::AuthError(_) => EnvelopeType::AuthError,
            Payload::AuthRegisterRequest(_) => EnvelopeType::AuthRegisterRequest,
            Payload::AuthRegisterChallenge(_) => EnvelopeType::AuthRegisterChallenge,
            Payload::AuthRegisterResponse(_) => EnvelopeType::AuthRegisterResponse,
            Payload::AuthRegisterSuccess(_) => EnvelopeType::AuthRegisterSuccess,
            Payload::MessageSend(_) => EnvelopeType::MessageSend,
            Payload::MessageReceive(_) => EnvelopeType::MessageReceive,
            Payload::MessageAck(_) => EnvelopeType::MessageAck,
            Payload::MessageDelivered(_) => EnvelopeType::MessageDelivered,
            Payload::GroupCreate(_) => EnvelopeType::GroupCreate,
            Payload::GroupCreated(_) => EnvelopeType::GroupCreated,
            Payload::GroupInvite(_) => EnvelopeType::GroupInvite,
            Payload::GroupMemberAdded(_) => EnvelopeType::GroupMemberAdded,
            Payload::GroupMemberRemoved(_) => EnvelopeType::GroupMemberRemoved,
            Payload::GroupLeave(_) => EnvelopeType::GroupLeave,
            Payload::KeyPackageUpload(_) => EnvelopeType::KeyPackageUpload,
            Payload::KeyPackageFetch(_) => EnvelopeType::KeyPackageFetch,
            Payload::KeyPackageResponse(_) => EnvelopeType::KeyPackageResponse,
            Payload::Welcome(_) => EnvelopeType::Welcome,
            Payload::WelcomeReceive(_) => EnvelopeType::WelcomeReceive,
            Payload::Commit(_) => EnvelopeType::Commit,
            Payload::CommitBroadcast(_) => EnvelopeType::CommitBroadcast,
            Payload::PresenceQuery(_) => EnvelopeType::PresenceQuery,
            Payload::PresenceStatus(_) => EnvelopeType::PresenceStatus,
            Payload::Ping(_) => EnvelopeType::Ping,
            Payload::Pong(_) => EnvelopeType::Pong,
            Payload::Error(_) => EnvelopeType::Error,
        }
    }

    pub(super) fn encode_body(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = match self {
            Payload::AuthRequest(body) => codec::to_vec(body)?,
            Payload::AuthChallenge(body) => codec::to_vec(body)?,
            Payload::AuthResponse(body) => codec::to_vec(body)?,
            Payload::AuthSuccess(body) => codec::to_vec(body)?,
            Payload::AuthError(body) => codec::to_vec(body)?,
            Payload::AuthRegisterRequest(body) => codec::to_vec(body)?,
            Payload::AuthRegisterChallenge(body) => codec::to_vec(body)?,
            Payload::AuthRegisterResponse(body) => codec::to_vec(body)?,
            Payload::AuthRegisterSuccess(body) => codec::to_vec(body)?,
            Payload::MessageSend(body) => codec::to_vec(body)?,
            Payload::MessageReceive(body) => codec::to_vec(body)?,
            Payload::MessageAck(body) => codec::to_vec(body)?,
            Payload::MessageDelivered(body) => codec::to_vec(body)?,
            Payload::GroupCreate(body) => codec::to_vec(body)?,
            Payload::GroupCreated(body) => codec::to_vec(body)?,
            Payload::GroupInvite(body) => codec::to_vec(body)?,
            Payload::GroupMemberAdded(body) => codec::to_vec(body)?,
            Payload::GroupMemberRemoved(body) => codec::to_vec(body)?,
            Payload::GroupLeave(body) => codec::to_vec(body)?,
            Payload::KeyPackageUpload(body) => codec::to_vec(body)?,
            Payload::KeyPackageFetch(body) => codec::to_vec(body)?,
            Payload::KeyPackageResponse(body) => codec::to_vec(body)?,
            Payload::Welcome(body) => codec::to_vec(body)?,
            Payload::WelcomeReceive(body) => codec::to_vec(body)?,
            Payload::Commit(body) => codec::to_vec(body)?,
            Payload::CommitBroadcast(body) => codec::to_vec(body)?,
            Payload::PresenceQuery(body) => codec::to_vec(body)?,
            Payload::PresenceStatus(body) => codec::to_vec(body)?,
            Payload::Ping(body) => codec::to_vec(body)?,
            Payload::Pong(body) => codec::to_vec(body)?,
            Payload::Error(body) => codec::to_vec(body)?,
        };
        Ok(body)
    }

    pub(super) fn decode_body(
        envelope_type: EnvelopeType,
        bytes: &[u8],
    ) -> Result<Self, ProtocolError> {
        let payload = match envelope_type {
            EnvelopeType::AuthRequest => Payload::AuthRequest(codec::from_slice(bytes)?),
            EnvelopeType::AuthChallenge => Payload::AuthChallenge(codec::from_slice(bytes)?),
            EnvelopeType::AuthResponse => Payload::AuthResponse(codec::from_slice(bytes)?),
            EnvelopeType::AuthSuccess => Payload::AuthSuccess(codec::from_slice(bytes)?),
            EnvelopeType::AuthError => Payload::AuthError(codec::from_slice(bytes)?),
            EnvelopeType::AuthRegisterRequest => {
                Payload::AuthRegisterRequest(codec::from_slice(bytes)?)
            }
            EnvelopeType::AuthRegisterChallenge => {
                Payload::AuthRegisterChallenge(codec::from_slice(bytes)?)
            }
            EnvelopeType::AuthRegisterResponse => {
                Payload::AuthRegisterResponse(codec::from_slice(bytes)?)
            }
            EnvelopeType::AuthRegisterSuccess => {
                Payload::AuthRegisterSuccess(codec::from_slice(bytes)?)
            }
            EnvelopeType::MessageSend => Payload::MessageSend(codec::from_slice(bytes)?),
            EnvelopeType::MessageReceive => Payload::MessageReceive(codec::from_slice(bytes)?),
            EnvelopeType::MessageAck => Payload::MessageAck(codec::from_slice(bytes)?),
            EnvelopeType::MessageDelivered => Payload::MessageDelivered(codec::from_slice(bytes)?),
            EnvelopeType::GroupCreate => Payload::GroupCreate(codec::from_slice(bytes)?),
            EnvelopeType::GroupCreated => Payload::GroupCreated(codec::from_slice(bytes)?),
            EnvelopeType::GroupInvite => Payload::GroupInvite(codec::from_slice(bytes)?),
            EnvelopeType::GroupMemberAdded => Payload::GroupMemberAdded(codec::from_slice(bytes)?),
            EnvelopeType::GroupMemberRemoved => {
                Payload::GroupMemberRemoved(codec::from_slice(bytes)?)
            }
            EnvelopeType::GroupLeave => Payload::GroupLeave(codec::from_slice(bytes)?),
            EnvelopeType::KeyPackageUpload => Payload::KeyPackageUpload(codec::from_slice(bytes)?),
            EnvelopeType::KeyPackageFetch => Payload::KeyPackageFetch(codec::from_slice(bytes)?),
            EnvelopeType::KeyPackageResponse => {
                Payload::KeyPackageResponse(codec::from_slice(bytes)?)
            }
            EnvelopeType::Welcome => Payload::Welcome(codec::from_slice(bytes)?),
            EnvelopeType::WelcomeReceive => Payload::WelcomeReceive(codec::from_slice(bytes)?),
            EnvelopeType::Commit => Payload::Commit(codec::from_slice(bytes)?),
            EnvelopeType::CommitBroadcast => Payload::CommitBroadcast(codec::from_slice(bytes)?),
            EnvelopeType::PresenceQuery => Payload::PresenceQuery(codec::from_slice(bytes)?),
            EnvelopeType::PresenceStatus => Payload::PresenceStatus(codec::from_slice(bytes)?),
            EnvelopeType::Ping => Payload::Ping(codec::from_slice(bytes)?),
            EnvelopeType::Pong => Payload::Pong(codec::from_slice(bytes)?),
            EnvelopeType::Error => Payload::Error(codec::from_slice(bytes)?),
        };
        Ok(payload)
    }
}
