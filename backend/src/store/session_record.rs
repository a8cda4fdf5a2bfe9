// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use havencommon::{
    identifiers::{CredentialId, SessionId, UserId},
    time,
};
use sqlx::SqliteExecutor;

/// A server-side session row. Only the SHA-256 hash of the session token is
/// stored; the raw token never touches the database.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SessionRecord {
    pub id: SessionId,
    pub user_id: UserId,
    pub credential_id: Option<CredentialId>,
    pub token_hash: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_seen_at: i64,
}

impl SessionRecord {
    pub(crate) fn new(
        user_id: UserId,
        credential_id: Option<CredentialId>,
        token_hash: String,
        lifetime_secs: i64,
    ) -> Self {
        let now = time::now_secs();
        Self {
            id: SessionId::random(),
            user_id,
            credential_id,
            token_hash,
            created_at: now,
            expires_at: now + lifetime_secs,
            last_seen_at: now,
        }
    }

    pub(crate) fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    pub(crate) async fn store(&self, executor: impl SqliteExecutor<'_>) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO sessions
                (id, user_id, credential_id, token_hash, created_at, expires_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.id)
        .bind(&self.user_id)
        .bind(&self.credential_id)
        .bind(&self.token_hash)
        .bind(self.created_at)
        .bind(self.expires_at)
        .bind(self.last_seen_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub(crate) async fn load_by_token_hash(
        executor: impl SqliteExecutor<'_>,
        token_hash: &str,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            "SELECT id, user_id, credential_id, token_hash, created_at, expires_at, last_seen_at
            FROM sessions WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(executor)
        .await
    }

    pub(crate) async fn touch(
        executor: impl SqliteExecutor<'_>,
        session_id: &SessionId,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query("UPDATE sessions SET last_seen_at = ? WHERE id = ?")
            .bind(time::now_secs())
            .bind(session_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn delete(
        executor: impl SqliteExecutor<'_>,
        session_id: &SessionId,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn delete_expired(
        executor: impl SqliteExecutor<'_>,
        now: i64,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
