// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::identifiers::{ConversationId, MessageId, UserId};

use super::*;

fn round_trip(envelope: Envelope) {
    let bytes = envelope.encode().unwrap();
    let decoded = Envelope::decode(&bytes).unwrap();
    assert_eq!(decoded, envelope);
}

#[test]
fn envelope_round_trips_for_every_type() {
    let user_id = UserId::random();
    let conversation_id = ConversationId::random();
    let message_id = MessageId::new("01HZXW5E8G0000000000000000".to_owned());
    let request_id = RequestId::new(b"req-1".to_vec()).unwrap();

    let payloads = vec![
        Payload::AuthRequest(AuthRequest {
            username: Some("alice".to_owned()),
            session_token: None,
        }),
        Payload::AuthChallenge(AuthChallenge {
            challenge_id: "c1".to_owned(),
            request_options: b"{}".to_vec(),
        }),
        Payload::AuthResponse(AuthResponse {
            challenge_id: "c1".to_owned(),
            credential: b"{}".to_vec(),
        }),
        Payload::AuthSuccess(AuthSuccess {
            session_token: Some("token".to_owned()),
            user_id: user_id.clone(),
            username: "alice".to_owned(),
            display_name: "Alice".to_owned(),
        }),
        Payload::AuthError(AuthError {
            code: error_codes::UNAUTHENTICATED,
            message: "invalid credential".to_owned(),
        }),
        Payload::AuthRegisterRequest(AuthRegisterRequest {
            username: "alice".to_owned(),
            display_name: "Alice".to_owned(),
        }),
        Payload::AuthRegisterChallenge(AuthRegisterChallenge {
            challenge_id: "c2".to_owned(),
            creation_options: b"{}".to_vec(),
        }),
        Payload::AuthRegisterResponse(AuthRegisterResponse {
            challenge_id: "c2".to_owned(),
            credential: b"{}".to_vec(),
        }),
        Payload::AuthRegisterSuccess(AuthRegisterSuccess {
            session_token: "token".to_owned(),
            user_id: user_id.clone(),
            username: "alice".to_owned(),
            display_name: "Alice".to_owned(),
        }),
        Payload::MessageSend(MessageSend {
            conversation_id: conversation_id.clone(),
            payload: vec![0xde, 0xad],
            message_type: MessageKind::Application,
            epoch: 3,
        }),
        Payload::MessageReceive(MessageReceive {
            message_id: message_id.clone(),
            conversation_id: conversation_id.clone(),
            sender_id: user_id.clone(),
            server_timestamp: 1_700_000_000_000_000,
            payload: vec![0xde, 0xad],
            message_type: MessageKind::Application,
            epoch: 3,
        }),
        Payload::MessageAck(MessageAck {
            message_id: message_id.clone(),
            status: DeliveryStatus::Delivered,
        }),
        Payload::MessageDelivered(MessageDelivered {
            message_id: message_id.clone(),
            delivered_to: user_id.clone(),
            status: DeliveryStatus::Read,
        }),
        Payload::GroupCreate(GroupCreate {
            title: "team".to_owned(),
            member_ids: vec![user_id.clone()],
        }),
        Payload::GroupCreated(GroupCreated {
            conversation_id: conversation_id.clone(),
            title: "team".to_owned(),
            members: vec![user_id.clone()],
        }),
        Payload::GroupInvite(GroupInvite {
            conversation_id: conversation_id.clone(),
            user_id: user_id.clone(),
        }),
        Payload::GroupMemberAdded(GroupMemberAdded {
            conversation_id: conversation_id.clone(),
            user_id: user_id.clone(),
            added_by: user_id.clone(),
        }),
        Payload::GroupMemberRemoved(GroupMemberRemoved {
            conversation_id: conversation_id.clone(),
            user_id: user_id.clone(),
        }),
        Payload::GroupLeave(GroupLeave {
            conversation_id: conversation_id.clone(),
        }),
        Payload::KeyPackageUpload(KeyPackageUpload {
            key_package: vec![1, 2, 3],
        }),
        Payload::KeyPackageFetch(KeyPackageFetch {
            user_id: user_id.clone(),
        }),
        Payload::KeyPackageResponse(KeyPackageResponse {
            user_id: user_id.clone(),
            key_package: vec![1, 2, 3],
        }),
        Payload::Welcome(Welcome {
            conversation_id: conversation_id.clone(),
            recipient_id: user_id.clone(),
            welcome: vec![4, 5],
        }),
        Payload::WelcomeReceive(WelcomeReceive {
            conversation_id: conversation_id.clone(),
            sender_id: user_id.clone(),
            welcome: vec![4, 5],
        }),
        Payload::Commit(Commit {
            conversation_id: conversation_id.clone(),
            commit: vec![6],
        }),
        Payload::CommitBroadcast(CommitBroadcast {
            conversation_id: conversation_id.clone(),
            sender_id: user_id.clone(),
            commit: vec![6],
        }),
        Payload::PresenceQuery(PresenceQuery {
            user_ids: vec![user_id.clone()],
        }),
        Payload::PresenceStatus(PresenceStatus {
            entries: vec![PresenceEntry {
                user_id: user_id.clone(),
                online: true,
            }],
        }),
        Payload::Ping(Ping { ts: 17 }),
        Payload::Pong(Pong { ts: 17 }),
        Payload::Error(ErrorBody {
            code: error_codes::INVALID_PAYLOAD,
            message: "bad".to_owned(),
            fatal: true,
        }),
    ];

    for payload in payloads {
        round_trip(Envelope::response(request_id.clone(), payload.clone()));
        round_trip(Envelope::push(payload));
    }
}

#[test]
fn wire_layout_is_stable() {
    // The discriminator values and the envelope header layout are part of
    // the wire contract; this pins them.
    let envelope = Envelope::response(
        RequestId::new(b"ab".to_vec()).unwrap(),
        Payload::Ping(Ping { ts: 1 }),
    );
    let bytes = envelope.encode().unwrap();
    // u16 type (60), u8 request id length, request id bytes.
    assert_eq!(&bytes[..5], &[0x00, 0x3c, 0x02, b'a', b'b']);
    // The body leads with the codec version byte.
    assert_eq!(bytes[5], 1);

    let cases = [
        (Payload::AuthRequest(AuthRequest { username: None, session_token: None }), 1u16),
        (Payload::MessageSend(MessageSend {
            conversation_id: ConversationId::random(),
            payload: vec![],
            message_type: MessageKind::Application,
            epoch: 0,
        }), 20),
        (Payload::GroupCreate(GroupCreate { title: String::new(), member_ids: vec![] }), 30),
        (Payload::KeyPackageUpload(KeyPackageUpload { key_package: vec![] }), 40),
        (Payload::PresenceQuery(PresenceQuery { user_ids: vec![] }), 50),
        (Payload::Pong(Pong { ts: 0 }), 61),
        (Payload::Error(ErrorBody { code: 0, message: String::new(), fatal: false }), 62),
    ];
    for (payload, expected) in cases {
        assert_eq!(payload.envelope_type() as u16, expected);
    }
}

#[test]
fn request_id_is_bounded() {
    assert!(RequestId::new(vec![0; MAX_REQUEST_ID_LEN]).is_ok());
    assert!(matches!(
        RequestId::new(vec![0; MAX_REQUEST_ID_LEN + 1]),
        Err(ProtocolError::RequestIdTooLong(_))
    ));
}

#[test]
fn unknown_discriminator_is_rejected() {
    let mut bytes = Envelope::push(Payload::Ping(Ping { ts: 0 })).encode().unwrap();
    bytes[0] = 0xff;
    bytes[1] = 0xff;
    assert!(matches!(
        Envelope::decode(&bytes),
        Err(ProtocolError::UnknownType(0xffff))
    ));
}

#[test]
fn truncated_frames_are_rejected() {
    assert!(matches!(
        Envelope::decode(&[0, 60]),
        Err(ProtocolError::Truncated)
    ));
    // Header claims a longer request id than the frame carries.
    assert!(matches!(
        Envelope::decode(&[0, 60, 8, 1, 2]),
        Err(ProtocolError::Truncated)
    ));
}

#[test]
fn malformed_body_is_a_codec_error() {
    let envelope = Envelope::push(Payload::Ping(Ping { ts: 0 }));
    let bytes = envelope.encode().unwrap();
    // Strip the body, keeping only the envelope header.
    assert!(matches!(
        Envelope::decode(&bytes[..3]),
        Err(ProtocolError::Body(_))
    ));
}
