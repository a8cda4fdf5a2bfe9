// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use havencommon::{identifiers::ChallengeId, time};
use serde::{Deserialize, Serialize};
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ChallengeKind {
    Registration,
    Login,
}

/// A single-use ceremony challenge. `state` is the opaque ceremony state
/// produced by the credential library; the row is deleted on any finish
/// attempt, successful or not.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ChallengeRecord {
    pub id: ChallengeId,
    pub state: Vec<u8>,
    pub username: Option<String>,
    pub kind: ChallengeKind,
    pub created_at: i64,
    pub expires_at: i64,
}

impl ChallengeRecord {
    pub(crate) fn new(
        state: Vec<u8>,
        username: Option<String>,
        kind: ChallengeKind,
        ttl_secs: i64,
    ) -> Self {
        let now = time::now_secs();
        Self {
            id: ChallengeId::random(),
            state,
            username,
            kind,
            created_at: now,
            expires_at: now + ttl_secs,
        }
    }

    pub(crate) fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    pub(crate) async fn store(&self, executor: impl SqliteExecutor<'_>) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO challenges (id, state, username, kind, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.id)
        .bind(&self.state)
        .bind(&self.username)
        .bind(self.kind)
        .bind(self.created_at)
        .bind(self.expires_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub(crate) async fn load(
        executor: impl SqliteExecutor<'_>,
        challenge_id: &ChallengeId,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            "SELECT id, state, username, kind, created_at, expires_at
            FROM challenges WHERE id = ?",
        )
        .bind(challenge_id)
        .fetch_optional(executor)
        .await
    }

    pub(crate) async fn delete(
        executor: impl SqliteExecutor<'_>,
        challenge_id: &ChallengeId,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM challenges WHERE id = ?")
            .bind(challenge_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn delete_expired(
        executor: impl SqliteExecutor<'_>,
        now: i64,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM challenges WHERE expires_at <= ?")
            .bind(now)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
