// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use havencommon::{
    identifiers::{KeyPackageId, UserId},
    time,
};
use sqlx::{SqliteConnection, SqliteExecutor};

/// A client-uploaded key package: opaque bytes another client consumes to
/// add the owner to a group. Strictly single-use.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct KeyPackageRecord {
    pub id: KeyPackageId,
    pub user_id: UserId,
    pub key_package: Vec<u8>,
    pub created_at: i64,
    pub expires_at: i64,
}

impl KeyPackageRecord {
    pub(crate) fn new(user_id: UserId, key_package: Vec<u8>, expires_at: i64) -> Self {
        Self {
            id: KeyPackageId::random(),
            user_id,
            key_package,
            created_at: time::now_secs(),
            expires_at,
        }
    }

    pub(crate) async fn store(&self, executor: impl SqliteExecutor<'_>) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO key_packages (id, user_id, key_package, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.id)
        .bind(&self.user_id)
        .bind(&self.key_package)
        .bind(self.created_at)
        .bind(self.expires_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Selects the oldest non-expired package for `user_id` and deletes it.
    /// Must run inside the caller's transaction so that concurrent consumers
    /// never observe the same package.
    pub(crate) async fn consume(
        connection: &mut SqliteConnection,
        user_id: &UserId,
        now: i64,
    ) -> sqlx::Result<Option<Self>> {
        let package: Option<Self> = sqlx::query_as(
            "SELECT id, user_id, key_package, created_at, expires_at
            FROM key_packages
            WHERE user_id = ? AND expires_at > ?
            ORDER BY created_at ASC, id ASC
            LIMIT 1",
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut *connection)
        .await?;
        let Some(package) = package else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM key_packages WHERE id = ?")
            .bind(&package.id)
            .execute(&mut *connection)
            .await?;

        Ok(Some(package))
    }

    pub(crate) async fn count_for_user(
        executor: impl SqliteExecutor<'_>,
        user_id: &UserId,
        now: i64,
    ) -> sqlx::Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM key_packages WHERE user_id = ? AND expires_at > ?",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub(crate) async fn delete_expired(
        executor: impl SqliteExecutor<'_>,
        now: i64,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM key_packages WHERE expires_at <= ?")
            .bind(now)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
