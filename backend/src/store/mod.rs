// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transactional persistence. The store exclusively owns all persistent
//! state; other components call its typed operations and never see SQL.
//!
//! A single SQLite file in WAL mode backs the store: one writer, concurrent
//! readers. Every multi-table write sequence (conversation plus memberships,
//! message plus delivery rows, key package consumption) runs in one
//! transaction.

use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use havencommon::{
    identifiers::{ChallengeId, ConversationId, CredentialId, MessageId, SessionId, UserId},
    protocol::{DeliveryStatus, MessageKind},
    time,
};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::info;

mod challenge_record;
mod conversation;
mod credential_record;
mod key_package;
mod message;
mod session_record;
mod user_record;

pub use challenge_record::{ChallengeKind, ChallengeRecord};
pub use conversation::{ConversationRecord, MemberRole, MembershipRecord};
pub use credential_record::CredentialRecord;
pub use key_package::KeyPackageRecord;
pub use message::{DeliveryRecord, MessageRecord, PageDirection};
pub use session_record::SessionRecord;
pub use user_record::{UserRecord, UserRole};

use crate::errors::{StorageError, StoreError};
use havencommon::identifiers::MessageIdGenerator;

use message::{DeliveryTransition, PAGE_LIMIT_DEFAULT, PAGE_LIMIT_MAX};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    message_ids: Arc<MessageIdGenerator>,
    /// Last assigned `server_timestamp` in unix microseconds.
    last_timestamp: Arc<Mutex<i64>>,
}

impl Store {
    /// Opens (creating if missing) the database file and applies pending
    /// migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migration successful");
        Ok(Self {
            pool,
            message_ids: Arc::new(MessageIdGenerator::new()),
            last_timestamp: Arc::new(Mutex::new(0)),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Strictly monotonic microsecond timestamp for message ordering.
    fn next_server_timestamp(&self) -> i64 {
        let mut last = self
            .last_timestamp
            .lock()
            .expect("timestamp clock poisoned");
        let candidate = time::now_micros();
        let timestamp = candidate.max(*last + 1);
        *last = timestamp;
        timestamp
    }

    // === Users ===

    pub async fn create_user(
        &self,
        username: &str,
        display_name: &str,
    ) -> Result<UserRecord, StoreError> {
        let user = UserRecord::new(username.to_owned(), display_name.to_owned());
        user.store(&self.pool).await?;
        info!(user_id = %user.id, username, "created user");
        Ok(user)
    }

    pub async fn get_user_by_id(&self, user_id: &UserId) -> Result<UserRecord, StoreError> {
        UserRecord::load(&self.pool, user_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<UserRecord, StoreError> {
        UserRecord::load_by_username(&self.pool, username)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn update_user(
        &self,
        user_id: &UserId,
        display_name: &str,
        role: UserRole,
        enabled: bool,
    ) -> Result<(), StoreError> {
        UserRecord::update(&self.pool, user_id, display_name, role, enabled)
            .await?
            .then_some(())
            .ok_or(StoreError::NotFound)
    }

    /// Creates the user together with its first credential in one
    /// transaction. The caller supplies the user id so that it can match the
    /// id bound into the registration ceremony.
    pub async fn register_user(
        &self,
        user_id: UserId,
        username: &str,
        display_name: &str,
        external_id: Vec<u8>,
        passkey: Vec<u8>,
        sign_count: i64,
    ) -> Result<(UserRecord, CredentialRecord), StoreError> {
        let now = time::now_secs();
        let user = UserRecord {
            id: user_id,
            username: username.to_owned(),
            display_name: display_name.to_owned(),
            role: UserRole::Member,
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        let credential = CredentialRecord::new(user.id.clone(), external_id, passkey, sign_count);

        let mut txn = self.pool.begin().await?;
        user.store(&mut *txn).await?;
        credential.store(&mut *txn).await?;
        txn.commit().await?;

        info!(user_id = %user.id, username, "registered user with credential");
        Ok((user, credential))
    }

    // === Credentials ===

    pub async fn create_credential(
        &self,
        user_id: UserId,
        external_id: Vec<u8>,
        passkey: Vec<u8>,
        sign_count: i64,
    ) -> Result<CredentialRecord, StoreError> {
        let credential = CredentialRecord::new(user_id, external_id, passkey, sign_count);
        credential.store(&self.pool).await?;
        Ok(credential)
    }

    pub async fn get_credential_by_external_id(
        &self,
        external_id: &[u8],
    ) -> Result<CredentialRecord, StoreError> {
        CredentialRecord::load_by_external_id(&self.pool, external_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn get_credentials_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        Ok(CredentialRecord::load_for_user(&self.pool, user_id).await?)
    }

    pub async fn update_sign_count(
        &self,
        credential_id: &CredentialId,
        sign_count: i64,
    ) -> Result<(), StoreError> {
        CredentialRecord::update_sign_count(&self.pool, credential_id, sign_count)
            .await?
            .then_some(())
            .ok_or(StoreError::NotFound)
    }

    // === Sessions ===

    pub async fn create_session(
        &self,
        user_id: UserId,
        credential_id: Option<CredentialId>,
        token_hash: String,
        lifetime_secs: i64,
    ) -> Result<SessionRecord, StoreError> {
        let session = SessionRecord::new(user_id, credential_id, token_hash, lifetime_secs);
        session.store(&self.pool).await?;
        Ok(session)
    }

    pub async fn get_session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<SessionRecord, StoreError> {
        SessionRecord::load_by_token_hash(&self.pool, token_hash)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn update_session_last_used(
        &self,
        session_id: &SessionId,
    ) -> Result<(), StoreError> {
        SessionRecord::touch(&self.pool, session_id)
            .await?
            .then_some(())
            .ok_or(StoreError::NotFound)
    }

    pub async fn delete_session(&self, session_id: &SessionId) -> Result<(), StoreError> {
        SessionRecord::delete(&self.pool, session_id)
            .await?
            .then_some(())
            .ok_or(StoreError::NotFound)
    }

    pub async fn delete_expired_sessions(&self) -> Result<u64, StoreError> {
        Ok(SessionRecord::delete_expired(&self.pool, time::now_secs()).await?)
    }

    // === Challenges ===

    pub async fn create_challenge(
        &self,
        state: Vec<u8>,
        username: Option<String>,
        kind: ChallengeKind,
        ttl_secs: i64,
    ) -> Result<ChallengeRecord, StoreError> {
        let challenge = ChallengeRecord::new(state, username, kind, ttl_secs);
        challenge.store(&self.pool).await?;
        Ok(challenge)
    }

    pub async fn get_challenge(
        &self,
        challenge_id: &ChallengeId,
    ) -> Result<ChallengeRecord, StoreError> {
        ChallengeRecord::load(&self.pool, challenge_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Idempotent: deleting an already-consumed challenge is not an error.
    pub async fn delete_challenge(&self, challenge_id: &ChallengeId) -> Result<(), StoreError> {
        ChallengeRecord::delete(&self.pool, challenge_id).await?;
        Ok(())
    }

    pub async fn delete_expired_challenges(&self) -> Result<u64, StoreError> {
        Ok(ChallengeRecord::delete_expired(&self.pool, time::now_secs()).await?)
    }

    // === Conversations ===

    /// Creates the conversation with the creator as admin plus the distinct
    /// additional members, all in one transaction.
    pub async fn create_conversation(
        &self,
        title: &str,
        creator: &UserId,
        member_ids: &[UserId],
    ) -> Result<ConversationRecord, StoreError> {
        let mut txn = self.pool.begin().await?;

        if UserRecord::load(&mut *txn, creator).await?.is_none() {
            return Err(StoreError::NotFound);
        }

        let conversation = ConversationRecord::new(title.to_owned(), creator.clone());
        conversation.store(&mut *txn).await?;
        MembershipRecord::insert(&mut *txn, &conversation.id, creator, MemberRole::Admin).await?;

        let mut seen = vec![creator.clone()];
        for member in member_ids {
            if seen.contains(member) {
                continue;
            }
            if UserRecord::load(&mut *txn, member).await?.is_none() {
                return Err(StoreError::NotFound);
            }
            MembershipRecord::insert(&mut *txn, &conversation.id, member, MemberRole::Member)
                .await?;
            seen.push(member.clone());
        }

        txn.commit().await?;
        info!(conversation_id = %conversation.id, members = seen.len(), "created conversation");
        Ok(conversation)
    }

    pub async fn get_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationRecord, StoreError> {
        ConversationRecord::load(&self.pool, conversation_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn add_member(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        role: MemberRole,
    ) -> Result<(), StoreError> {
        Ok(MembershipRecord::insert(&self.pool, conversation_id, user_id, role).await?)
    }

    pub async fn remove_member(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        MembershipRecord::remove(&self.pool, conversation_id, user_id)
            .await?
            .then_some(())
            .ok_or(StoreError::NotFound)
    }

    pub async fn get_members(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<MembershipRecord>, StoreError> {
        Ok(MembershipRecord::load_members(&self.pool, conversation_id).await?)
    }

    pub async fn get_conversations_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConversationRecord>, StoreError> {
        Ok(ConversationRecord::load_for_user(&self.pool, user_id).await?)
    }

    pub async fn is_user_member(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<bool, StoreError> {
        Ok(
            MembershipRecord::role_of(&self.pool, conversation_id, user_id)
                .await?
                .is_some(),
        )
    }

    pub async fn get_member_role(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<MemberRole, StoreError> {
        MembershipRecord::role_of(&self.pool, conversation_id, user_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Promotes the longest-standing remaining member to admin when an admin
    /// leaves. Returns the promoted user, if any member remains.
    pub async fn transfer_admin(
        &self,
        conversation_id: &ConversationId,
        leaving_user: &UserId,
    ) -> Result<Option<UserId>, StoreError> {
        Ok(MembershipRecord::transfer_admin(&self.pool, conversation_id, leaving_user).await?)
    }

    // === Messages ===

    /// Persists the message with a fresh sortable id and a strictly
    /// monotonic server timestamp, and creates one pending delivery row per
    /// non-sender member, all in one transaction.
    pub async fn insert_message(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        payload: Vec<u8>,
        message_type: MessageKind,
        epoch: i64,
    ) -> Result<MessageRecord, StoreError> {
        let message = MessageRecord {
            id: self.message_ids.generate(),
            conversation_id: conversation_id.clone(),
            sender_id: sender_id.clone(),
            server_timestamp: self.next_server_timestamp(),
            payload_size: payload.len() as i64,
            payload,
            message_type,
            epoch,
            created_at: time::now_secs(),
        };

        let mut txn = self.pool.begin().await?;
        MessageRecord::insert_with_delivery_rows(&mut *txn, &message).await?;
        txn.commit().await?;

        Ok(message)
    }

    pub async fn get_message(&self, message_id: &MessageId) -> Result<MessageRecord, StoreError> {
        MessageRecord::load(&self.pool, message_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Cursor-stable pagination. The limit is clamped to [1, 200], with a
    /// default of 50 for non-positive values.
    pub async fn get_messages_by_group(
        &self,
        conversation_id: &ConversationId,
        cursor: Option<&MessageId>,
        limit: i64,
        direction: PageDirection,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let limit = if limit <= 0 {
            PAGE_LIMIT_DEFAULT
        } else {
            limit.min(PAGE_LIMIT_MAX)
        };
        Ok(MessageRecord::page_for_conversation(
            &self.pool,
            conversation_id,
            cursor,
            limit,
            direction,
        )
        .await?)
    }

    /// All messages still pending for `recipient`, in ascending server
    /// timestamp order.
    pub async fn get_pending_messages(
        &self,
        recipient: &UserId,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        Ok(MessageRecord::load_pending_for(&self.pool, recipient).await?)
    }

    /// Monotonic per-recipient delivery transition; fails with `NotFound`
    /// when no delivery row exists (e.g. the message has been pruned).
    pub async fn update_delivery_status(
        &self,
        message_id: &MessageId,
        recipient_id: &UserId,
        new_status: DeliveryStatus,
    ) -> Result<(), StoreError> {
        let mut txn = self.pool.begin().await?;
        let transition =
            DeliveryRecord::advance(&mut *txn, message_id, recipient_id, new_status).await?;
        txn.commit().await?;
        match transition {
            Some(DeliveryTransition::Advanced | DeliveryTransition::Unchanged) => Ok(()),
            None => Err(StoreError::NotFound),
        }
    }

    pub async fn get_delivery_status(
        &self,
        message_id: &MessageId,
        recipient_id: &UserId,
    ) -> Result<DeliveryRecord, StoreError> {
        DeliveryRecord::load(&self.pool, message_id, recipient_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Retention sweep: drops messages older than the cutoff; delivery rows
    /// cascade.
    pub async fn delete_expired_messages(&self, cutoff_micros: i64) -> Result<u64, StoreError> {
        Ok(MessageRecord::delete_older_than(&self.pool, cutoff_micros).await?)
    }

    // === Key packages ===

    pub async fn store_key_package(
        &self,
        user_id: UserId,
        key_package: Vec<u8>,
        expires_at: i64,
    ) -> Result<KeyPackageRecord, StoreError> {
        let record = KeyPackageRecord::new(user_id, key_package, expires_at);
        record.store(&self.pool).await?;
        Ok(record)
    }

    /// Atomically hands out the oldest non-expired package for `user_id`
    /// and deletes it; `NotFound` when none is available.
    pub async fn consume_key_package(
        &self,
        user_id: &UserId,
    ) -> Result<KeyPackageRecord, StoreError> {
        let mut txn = self.pool.begin().await?;
        let package = KeyPackageRecord::consume(&mut *txn, user_id, time::now_secs()).await?;
        txn.commit().await?;
        package.ok_or(StoreError::NotFound)
    }

    pub async fn count_key_packages(&self, user_id: &UserId) -> Result<i64, StoreError> {
        Ok(KeyPackageRecord::count_for_user(&self.pool, user_id, time::now_secs()).await?)
    }

    pub async fn delete_expired_key_packages(&self) -> Result<u64, StoreError> {
        Ok(KeyPackageRecord::delete_expired(&self.pool, time::now_secs()).await?)
    }
}
