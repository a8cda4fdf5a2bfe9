// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Envelope dispatch.
//!
//! The router receives decoded envelopes from a connection's reader task,
//! enforces the pre-auth → authenticated state machine, consults the store
//! for authorization and persistence and pushes frames to other connections
//! through the hub. Replies to the originating connection go through that
//! connection's own outbound queue so per-connection ordering holds.
//!
//! The router never inspects the opaque byte fields of messaging, group or
//! key-distribution payloads.

use std::sync::Arc;

use havencommon::{
    identifiers::{ConnectionId, UserId},
    protocol::{
        AuthRequest, AuthRegisterRequest, AuthRegisterResponse, AuthRegisterSuccess, AuthResponse,
        AuthSuccess, Commit, CommitBroadcast, DeliveryStatus, Envelope, GroupCreate,
        GroupCreated, GroupInvite, GroupLeave, GroupMemberAdded, GroupMemberRemoved,
        KeyPackageFetch, KeyPackageResponse, KeyPackageUpload, MessageAck, MessageDelivered,
        MessageReceive, MessageSend, Payload, Ping, Pong, PresenceEntry, PresenceQuery,
        PresenceStatus, RequestId, Welcome, WelcomeReceive,
    },
    time,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    auth::AuthService,
    errors::StoreError,
    hub::{ConnectionHandle, Hub},
    store::{MemberRole, Store, UserRecord},
};

mod errors;

pub use errors::RouterError;

/// Authentication state of a single connection.
#[derive(Debug)]
pub enum ConnectionState {
    Unauthenticated,
    Authenticated { user: UserRecord },
}

impl ConnectionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionState::Authenticated { .. })
    }

    fn user(&self) -> Option<&UserRecord> {
        match self {
            ConnectionState::Authenticated { user } => Some(user),
            ConnectionState::Unauthenticated => None,
        }
    }
}

/// Everything the router needs to know about the originating connection:
/// its identity, its outbound queue and its authentication state. Owned by
/// the connection's reader task.
pub struct ConnectionContext {
    connection_id: ConnectionId,
    outbound: mpsc::Sender<Envelope>,
    cancellation: CancellationToken,
    state: ConnectionState,
}

impl ConnectionContext {
    pub fn new(
        connection_id: ConnectionId,
        outbound: mpsc::Sender<Envelope>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            connection_id,
            outbound,
            cancellation,
            state: ConnectionState::Unauthenticated,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn authenticated_user(&self) -> Option<&UserRecord> {
        self.state.user()
    }

    /// Sends a frame to this connection, waiting for queue space. Replies
    /// exert backpressure on the reader instead of dropping the connection.
    async fn send(&self, envelope: Envelope) -> Result<(), RouterError> {
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| RouterError::ConnectionClosed)
    }
}

pub struct Router {
    store: Store,
    auth: AuthService,
    hub: Arc<Hub>,
    key_package_lifetime_secs: i64,
}

impl Router {
    pub fn new(
        store: Store,
        auth: AuthService,
        hub: Arc<Hub>,
        key_package_lifetime_secs: i64,
    ) -> Self {
        Self {
            store,
            auth,
            hub,
            key_package_lifetime_secs,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Dispatches one inbound envelope. Replies are enqueued on the
    /// originating connection; errors are returned for the connection layer
    /// to turn into `Error` envelopes.
    pub async fn handle_envelope(
        &self,
        ctx: &mut ConnectionContext,
        envelope: Envelope,
    ) -> Result<(), RouterError> {
        let request_id = envelope.request_id.clone();
        match (ctx.state.is_authenticated(), envelope.payload) {
            // === Pre-auth ===
            (false, Payload::AuthRequest(body)) => {
                self.handle_auth_request(ctx, request_id, body).await
            }
            (false, Payload::AuthResponse(body)) => {
                self.handle_auth_response(ctx, request_id, body).await
            }
            (false, Payload::AuthRegisterRequest(body)) => {
                self.handle_register_request(ctx, request_id, body).await
            }
            (false, Payload::AuthRegisterResponse(body)) => {
                self.handle_register_response(ctx, request_id, body).await
            }
            // Heartbeats are allowed in any state.
            (_, Payload::Ping(body)) => self.handle_ping(ctx, request_id, body).await,
            (_, Payload::Pong(_)) => {
                // Pong matching happens in the connection's heartbeat loop;
                // an unsolicited pong is harmless.
                Ok(())
            }
            (false, payload) => {
                warn!(
                    connection_id = %ctx.connection_id,
                    envelope_type = ?payload.envelope_type(),
                    "protocol violation before authentication"
                );
                Err(RouterError::ProtocolViolation(
                    "authentication required".to_owned(),
                ))
            }

            // === Authenticated ===
            (true, payload) => {
                let user = ctx
                    .state
                    .user()
                    .cloned()
                    .ok_or(RouterError::ConnectionClosed)?;
                match payload {
                    Payload::MessageSend(body) => {
                        self.handle_message_send(ctx, request_id, &user, body).await
                    }
                    Payload::MessageAck(body) => self.handle_message_ack(&user, body).await,
                    Payload::GroupCreate(body) => {
                        self.handle_group_create(ctx, request_id, &user, body).await
                    }
                    Payload::GroupInvite(body) => {
                        self.handle_group_invite(ctx, request_id, &user, body).await
                    }
                    Payload::GroupLeave(body) => {
                        self.handle_group_leave(ctx, request_id, &user, body).await
                    }
                    Payload::KeyPackageUpload(body) => {
                        self.handle_key_package_upload(&user, body).await
                    }
                    Payload::KeyPackageFetch(body) => {
                        self.handle_key_package_fetch(ctx, request_id, body).await
                    }
                    Payload::Welcome(body) => self.handle_welcome(&user, body).await,
                    Payload::Commit(body) => self.handle_commit(&user, body).await,
                    Payload::PresenceQuery(body) => {
                        self.handle_presence_query(ctx, request_id, body).await
                    }
                    // A second authentication on a live connection is not a
                    // protocol violation worth closing over, just invalid.
                    Payload::AuthRequest(_)
                    | Payload::AuthResponse(_)
                    | Payload::AuthRegisterRequest(_)
                    | Payload::AuthRegisterResponse(_) => Err(RouterError::InvalidPayload(
                        "connection is already authenticated".to_owned(),
                    )),
                    other => Err(RouterError::InvalidPayload(format!(
                        "client-sent {:?} envelope",
                        other.envelope_type()
                    ))),
                }
            }
        }
    }

    /// Tears down the connection's presence. Called by the connection layer
    /// exactly once when the reader task ends.
    pub async fn connection_closed(&self, ctx: &ConnectionContext) {
        if let Some(user) = ctx.state.user() {
            self.hub.unregister(&user.id, &ctx.connection_id).await;
            if !self.hub.is_online(&user.id).await {
                self.broadcast_presence(&user.id, false).await;
            }
        }
    }

    // === Authentication ===

    async fn handle_auth_request(
        &self,
        ctx: &mut ConnectionContext,
        request_id: RequestId,
        body: AuthRequest,
    ) -> Result<(), RouterError> {
        if let Some(token) = body.session_token.as_deref() {
            // Session resume: no ceremony, no fresh token.
            let (_session, user) = self
                .auth
                .validate_session(token)
                .await
                .map_err(RouterError::AuthFailed)?;
            let reply = Envelope::response(
                request_id,
                Payload::AuthSuccess(AuthSuccess {
                    session_token: None,
                    user_id: user.id.clone(),
                    username: user.username.clone(),
                    display_name: user.display_name.clone(),
                }),
            );
            return self.complete_authentication(ctx, user, reply).await;
        }

        let Some(username) = body.username.as_deref() else {
            return Err(RouterError::InvalidPayload(
                "neither username nor session token".to_owned(),
            ));
        };
        let (challenge_id, request_options) = self
            .auth
            .begin_login(username)
            .await
            .map_err(RouterError::AuthFailed)?;
        ctx.send(Envelope::response(
            request_id,
            Payload::AuthChallenge(havencommon::protocol::AuthChallenge {
                challenge_id: challenge_id.to_string(),
                request_options,
            }),
        ))
        .await
    }

    async fn handle_auth_response(
        &self,
        ctx: &mut ConnectionContext,
        request_id: RequestId,
        body: AuthResponse,
    ) -> Result<(), RouterError> {
        let challenge_id = body.challenge_id.into();
        let (token, user) = self
            .auth
            .finish_login(&challenge_id, &body.credential)
            .await
            .map_err(RouterError::AuthFailed)?;
        let reply = Envelope::response(
            request_id,
            Payload::AuthSuccess(AuthSuccess {
                session_token: Some(token.into_string()),
                user_id: user.id.clone(),
                username: user.username.clone(),
                display_name: user.display_name.clone(),
            }),
        );
        self.complete_authentication(ctx, user, reply).await
    }

    async fn handle_register_request(
        &self,
        ctx: &mut ConnectionContext,
        request_id: RequestId,
        body: AuthRegisterRequest,
    ) -> Result<(), RouterError> {
        let (challenge_id, creation_options) = self
            .auth
            .begin_registration(&body.username, &body.display_name)
            .await
            .map_err(RouterError::AuthFailed)?;
        ctx.send(Envelope::response(
            request_id,
            Payload::AuthRegisterChallenge(havencommon::protocol::AuthRegisterChallenge {
                challenge_id: challenge_id.to_string(),
                creation_options,
            }),
        ))
        .await
    }

    async fn handle_register_response(
        &self,
        ctx: &mut ConnectionContext,
        request_id: RequestId,
        body: AuthRegisterResponse,
    ) -> Result<(), RouterError> {
        let challenge_id = body.challenge_id.into();
        let (token, user) = self
            .auth
            .finish_registration(&challenge_id, &body.credential)
            .await
            .map_err(RouterError::AuthFailed)?;
        let reply = Envelope::response(
            request_id,
            Payload::AuthRegisterSuccess(AuthRegisterSuccess {
                session_token: token.into_string(),
                user_id: user.id.clone(),
                username: user.username.clone(),
                display_name: user.display_name.clone(),
            }),
        );
        self.complete_authentication(ctx, user, reply).await
    }

    /// Transitions the connection to authenticated: registers it with the
    /// hub, sends the success reply, announces presence and flushes pending
    /// messages in ascending server timestamp order.
    async fn complete_authentication(
        &self,
        ctx: &mut ConnectionContext,
        user: UserRecord,
        reply: Envelope,
    ) -> Result<(), RouterError> {
        let user_id = user.id.clone();
        let was_online = self.hub.is_online(&user_id).await;

        self.hub
            .register(ConnectionHandle::new(
                ctx.connection_id.clone(),
                user_id.clone(),
                ctx.outbound.clone(),
                ctx.cancellation.clone(),
            ))
            .await;
        ctx.state = ConnectionState::Authenticated { user };

        info!(connection_id = %ctx.connection_id, user_id = %user_id, "connection authenticated");
        ctx.send(reply).await?;

        if !was_online {
            self.broadcast_presence(&user_id, true).await;
        }
        self.flush_pending(ctx, &user_id).await
    }

    /// Offline delivery: every message still pending for the user is pushed
    /// on this connection and transitioned to delivered after the enqueue.
    async fn flush_pending(
        &self,
        ctx: &ConnectionContext,
        user_id: &UserId,
    ) -> Result<(), RouterError> {
        let pending = self.store.get_pending_messages(user_id).await?;
        if pending.is_empty() {
            return Ok(());
        }
        let count = pending.len();
        for message in pending {
            ctx.send(Envelope::push(Payload::MessageReceive(MessageReceive {
                message_id: message.id.clone(),
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                server_timestamp: message.server_timestamp,
                payload: message.payload,
                message_type: message.message_type,
                epoch: message.epoch as u64,
            })))
            .await?;
            // The row may have been pruned concurrently; that is fine.
            match self
                .store
                .update_delivery_status(&message.id, user_id, DeliveryStatus::Delivered)
                .await
            {
                Ok(()) | Err(StoreError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(user_id = %user_id, count, "flushed pending messages");
        Ok(())
    }

    // === Messaging ===

    async fn handle_message_send(
        &self,
        ctx: &ConnectionContext,
        request_id: RequestId,
        user: &UserRecord,
        body: MessageSend,
    ) -> Result<(), RouterError> {
        if !self
            .store
            .is_user_member(&body.conversation_id, &user.id)
            .await?
        {
            return Err(RouterError::Unauthorized);
        }

        let message = self
            .store
            .insert_message(
                &body.conversation_id,
                &user.id,
                body.payload,
                body.message_type,
                body.epoch as i64,
            )
            .await?;

        let receive = MessageReceive {
            message_id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            sender_id: user.id.clone(),
            server_timestamp: message.server_timestamp,
            payload: message.payload.clone(),
            message_type: message.message_type,
            epoch: message.epoch as u64,
        };

        // Echo to the sender with the original request id so it learns the
        // assigned id and timestamp.
        ctx.send(Envelope::response(
            request_id,
            Payload::MessageReceive(receive.clone()),
        ))
        .await?;

        // Fan out to everyone else; offline members keep their pending rows.
        let recipients = self.member_ids_excluding(&message.conversation_id, &user.id).await?;
        let push = Envelope::push(Payload::MessageReceive(receive));
        self.hub.send_to_users(&recipients, &push).await;
        Ok(())
    }

    async fn handle_message_ack(
        &self,
        user: &UserRecord,
        body: MessageAck,
    ) -> Result<(), RouterError> {
        if body.status == DeliveryStatus::Pending {
            return Err(RouterError::InvalidPayload(
                "cannot acknowledge back to pending".to_owned(),
            ));
        }

        // Both lookups go silent on NotFound: the message may have been
        // pruned since it was delivered.
        let message = match self.store.get_message(&body.message_id).await {
            Ok(message) => message,
            Err(StoreError::NotFound) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match self
            .store
            .update_delivery_status(&body.message_id, &user.id, body.status)
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let notification = Envelope::push(Payload::MessageDelivered(MessageDelivered {
            message_id: body.message_id,
            delivered_to: user.id.clone(),
            status: body.status,
        }));
        self.hub.send_to_user(&message.sender_id, &notification).await;
        Ok(())
    }

    // === Group management ===

    async fn handle_group_create(
        &self,
        ctx: &ConnectionContext,
        request_id: RequestId,
        user: &UserRecord,
        body: GroupCreate,
    ) -> Result<(), RouterError> {
        let conversation = self
            .store
            .create_conversation(&body.title, &user.id, &body.member_ids)
            .await?;
        let members: Vec<UserId> = self
            .store
            .get_members(&conversation.id)
            .await?
            .into_iter()
            .map(|member| member.user_id)
            .collect();

        ctx.send(Envelope::response(
            request_id,
            Payload::GroupCreated(GroupCreated {
                conversation_id: conversation.id.clone(),
                title: conversation.title.clone(),
                members: members.clone(),
            }),
        ))
        .await?;

        for member in members.iter().filter(|member| **member != user.id) {
            let added = Envelope::push(Payload::GroupMemberAdded(GroupMemberAdded {
                conversation_id: conversation.id.clone(),
                user_id: member.clone(),
                added_by: user.id.clone(),
            }));
            self.hub.send_to_user(member, &added).await;
        }
        Ok(())
    }

    async fn handle_group_invite(
        &self,
        ctx: &ConnectionContext,
        request_id: RequestId,
        user: &UserRecord,
        body: GroupInvite,
    ) -> Result<(), RouterError> {
        match self
            .store
            .get_member_role(&body.conversation_id, &user.id)
            .await
        {
            Ok(MemberRole::Admin) => {}
            Ok(MemberRole::Member) | Err(StoreError::NotFound) => {
                return Err(RouterError::Unauthorized);
            }
            Err(e) => return Err(e.into()),
        }
        // The invitee must exist.
        self.store.get_user_by_id(&body.user_id).await?;

        let newly_added = match self
            .store
            .add_member(&body.conversation_id, &body.user_id, MemberRole::Member)
            .await
        {
            Ok(()) => true,
            // Already a member: silent no-op.
            Err(StoreError::Conflict) => false,
            Err(e) => return Err(e.into()),
        };

        let added = GroupMemberAdded {
            conversation_id: body.conversation_id.clone(),
            user_id: body.user_id.clone(),
            added_by: user.id.clone(),
        };
        // Confirmation to the inviter either way; notification to the new
        // member only when the membership actually changed.
        ctx.send(Envelope::response(
            request_id,
            Payload::GroupMemberAdded(added.clone()),
        ))
        .await?;
        if newly_added {
            self.hub
                .send_to_user(&body.user_id, &Envelope::push(Payload::GroupMemberAdded(added)))
                .await;
        }
        Ok(())
    }

    async fn handle_group_leave(
        &self,
        ctx: &ConnectionContext,
        request_id: RequestId,
        user: &UserRecord,
        body: GroupLeave,
    ) -> Result<(), RouterError> {
        let role = match self
            .store
            .get_member_role(&body.conversation_id, &user.id)
            .await
        {
            Ok(role) => role,
            Err(StoreError::NotFound) => return Err(RouterError::Unauthorized),
            Err(e) => return Err(e.into()),
        };

        let members = self.store.get_members(&body.conversation_id).await?;
        if role == MemberRole::Admin {
            let another_admin = members
                .iter()
                .any(|member| member.user_id != user.id && member.role == MemberRole::Admin);
            if !another_admin && members.len() > 1 {
                let promoted = self
                    .store
                    .transfer_admin(&body.conversation_id, &user.id)
                    .await?;
                if let Some(promoted) = promoted {
                    info!(
                        conversation_id = %body.conversation_id,
                        user_id = %promoted,
                        "transferred group admin"
                    );
                }
            }
        }

        self.store
            .remove_member(&body.conversation_id, &user.id)
            .await?;

        let removed = GroupMemberRemoved {
            conversation_id: body.conversation_id.clone(),
            user_id: user.id.clone(),
        };
        ctx.send(Envelope::response(
            request_id,
            Payload::GroupMemberRemoved(removed.clone()),
        ))
        .await?;

        let remaining: Vec<UserId> = members
            .into_iter()
            .map(|member| member.user_id)
            .filter(|member| *member != user.id)
            .collect();
        self.hub
            .send_to_users(&remaining, &Envelope::push(Payload::GroupMemberRemoved(removed)))
            .await;
        Ok(())
    }

    // === Key distribution ===

    async fn handle_key_package_upload(
        &self,
        user: &UserRecord,
        body: KeyPackageUpload,
    ) -> Result<(), RouterError> {
        if body.key_package.is_empty() {
            return Err(RouterError::InvalidPayload("empty key package".to_owned()));
        }
        let expires_at = time::now_secs() + self.key_package_lifetime_secs;
        self.store
            .store_key_package(user.id.clone(), body.key_package, expires_at)
            .await?;
        debug!(user_id = %user.id, "stored key package");
        Ok(())
    }

    async fn handle_key_package_fetch(
        &self,
        ctx: &ConnectionContext,
        request_id: RequestId,
        body: KeyPackageFetch,
    ) -> Result<(), RouterError> {
        let package = self.store.consume_key_package(&body.user_id).await?;
        ctx.send(Envelope::response(
            request_id,
            Payload::KeyPackageResponse(KeyPackageResponse {
                user_id: body.user_id,
                key_package: package.key_package,
            }),
        ))
        .await
    }

    async fn handle_welcome(&self, user: &UserRecord, body: Welcome) -> Result<(), RouterError> {
        if !self
            .store
            .is_user_member(&body.conversation_id, &user.id)
            .await?
        {
            return Err(RouterError::Unauthorized);
        }
        // Forwarded only if the recipient is online; a welcome for an
        // offline recipient is re-sent by the client after key package
        // consumption succeeds elsewhere.
        let push = Envelope::push(Payload::WelcomeReceive(WelcomeReceive {
            conversation_id: body.conversation_id,
            sender_id: user.id.clone(),
            welcome: body.welcome,
        }));
        self.hub.send_to_user(&body.recipient_id, &push).await;
        Ok(())
    }

    async fn handle_commit(&self, user: &UserRecord, body: Commit) -> Result<(), RouterError> {
        if !self
            .store
            .is_user_member(&body.conversation_id, &user.id)
            .await?
        {
            return Err(RouterError::Unauthorized);
        }
        let recipients = self
            .member_ids_excluding(&body.conversation_id, &user.id)
            .await?;
        let push = Envelope::push(Payload::CommitBroadcast(CommitBroadcast {
            conversation_id: body.conversation_id,
            sender_id: user.id.clone(),
            commit: body.commit,
        }));
        self.hub.send_to_users(&recipients, &push).await;
        Ok(())
    }

    // === Presence ===

    const PRESENCE_QUERY_LIMIT: usize = 256;

    async fn handle_presence_query(
        &self,
        ctx: &ConnectionContext,
        request_id: RequestId,
        body: PresenceQuery,
    ) -> Result<(), RouterError> {
        if body.user_ids.len() > Self::PRESENCE_QUERY_LIMIT {
            return Err(RouterError::InvalidPayload("presence query too large".to_owned()));
        }
        let mut entries = Vec::with_capacity(body.user_ids.len());
        for user_id in body.user_ids {
            let online = self.hub.is_online(&user_id).await;
            entries.push(PresenceEntry { user_id, online });
        }
        ctx.send(Envelope::response(
            request_id,
            Payload::PresenceStatus(PresenceStatus { entries }),
        ))
        .await
    }

    /// Pushes a presence change to everyone sharing a conversation with the
    /// user.
    async fn broadcast_presence(&self, user_id: &UserId, online: bool) {
        let watchers = match self.co_members(user_id).await {
            Ok(watchers) => watchers,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "presence broadcast failed");
                return;
            }
        };
        if watchers.is_empty() {
            return;
        }
        let push = Envelope::push(Payload::PresenceStatus(PresenceStatus {
            entries: vec![PresenceEntry {
                user_id: user_id.clone(),
                online,
            }],
        }));
        self.hub.send_to_users(&watchers, &push).await;
    }

    // === Heartbeat ===

    async fn handle_ping(
        &self,
        ctx: &ConnectionContext,
        request_id: RequestId,
        body: Ping,
    ) -> Result<(), RouterError> {
        ctx.send(Envelope::response(request_id, Payload::Pong(Pong { ts: body.ts })))
            .await
    }

    // === Helpers ===

    async fn member_ids_excluding(
        &self,
        conversation_id: &havencommon::identifiers::ConversationId,
        excluded: &UserId,
    ) -> Result<Vec<UserId>, RouterError> {
        Ok(self
            .store
            .get_members(conversation_id)
            .await?
            .into_iter()
            .map(|member| member.user_id)
            .filter(|member| member != excluded)
            .collect())
    }

    /// Distinct users sharing at least one conversation with `user_id`.
    async fn co_members(&self, user_id: &UserId) -> Result<Vec<UserId>, RouterError> {
        let mut watchers = Vec::new();
        for conversation in self.store.get_conversations_for_user(user_id).await? {
            for member in self.store.get_members(&conversation.id).await? {
                if member.user_id != *user_id && !watchers.contains(&member.user_id) {
                    watchers.push(member.user_id);
                }
            }
        }
        Ok(watchers)
    }
}
