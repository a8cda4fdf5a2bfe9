// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use havencommon::{identifiers::UserId, time};
use serde::{Deserialize, Serialize};
use sqlx::SqliteExecutor;

/// Role gating administrative operations on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserRole {
    Member,
    Admin,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub role: UserRole,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UserRecord {
    /// A fresh, enabled member account. Usernames are case-sensitive; the
    /// store enforces their uniqueness.
    pub(crate) fn new(username: String, display_name: String) -> Self {
        let now = time::now_secs();
        Self {
            id: UserId::random(),
            username,
            display_name,
            role: UserRole::Member,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) async fn store(&self, executor: impl SqliteExecutor<'_>) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO users
                (id, username, display_name, role, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.id)
        .bind(&self.username)
        .bind(&self.display_name)
        .bind(self.role)
        .bind(self.enabled)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub(crate) async fn load(
        executor: impl SqliteExecutor<'_>,
        user_id: &UserId,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            "SELECT id, username, display_name, role, enabled, created_at, updated_at
            FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(executor)
        .await
    }

    pub(crate) async fn load_by_username(
        executor: impl SqliteExecutor<'_>,
        username: &str,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            "SELECT id, username, display_name, role, enabled, created_at, updated_at
            FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(executor)
        .await
    }

    /// Updates the mutable attributes of an account. Returns false if the
    /// user does not exist.
    pub(crate) async fn update(
        executor: impl SqliteExecutor<'_>,
        user_id: &UserId,
        display_name: &str,
        role: UserRole,
        enabled: bool,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET display_name = ?, role = ?, enabled = ?, updated_at = ?
            WHERE id = ?",
        )
        .bind(display_name)
        .bind(role)
        .bind(enabled)
        .bind(time::now_secs())
        .bind(user_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
