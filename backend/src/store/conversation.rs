// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use havencommon::{
    identifiers::{ConversationId, UserId},
    time,
};
use serde::{Deserialize, Serialize};
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MemberRole {
    Member,
    Admin,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub title: String,
    pub created_by: UserId,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MembershipRecord {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub joined_at: i64,
}

impl ConversationRecord {
    pub(crate) fn new(title: String, created_by: UserId) -> Self {
        Self {
            id: ConversationId::random(),
            title,
            created_by,
            created_at: time::now_secs(),
        }
    }

    pub(crate) async fn store(&self, executor: impl SqliteExecutor<'_>) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO conversations (id, title, created_by, created_at)
            VALUES (?, ?, ?, ?)",
        )
        .bind(&self.id)
        .bind(&self.title)
        .bind(&self.created_by)
        .bind(self.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub(crate) async fn load(
        executor: impl SqliteExecutor<'_>,
        conversation_id: &ConversationId,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            "SELECT id, title, created_by, created_at FROM conversations WHERE id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(executor)
        .await
    }

    pub(crate) async fn load_for_user(
        executor: impl SqliteExecutor<'_>,
        user_id: &UserId,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as(
            "SELECT c.id, c.title, c.created_by, c.created_at
            FROM conversations c
            INNER JOIN conversation_members m ON m.conversation_id = c.id
            WHERE m.user_id = ?
            ORDER BY c.created_at ASC, c.id ASC",
        )
        .bind(user_id)
        .fetch_all(executor)
        .await
    }
}

impl MembershipRecord {
    pub(crate) async fn insert(
        executor: impl SqliteExecutor<'_>,
        conversation_id: &ConversationId,
        user_id: &UserId,
        role: MemberRole,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
            VALUES (?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(role)
        .bind(time::now_secs())
        .execute(executor)
        .await?;
        Ok(())
    }

    pub(crate) async fn remove(
        executor: impl SqliteExecutor<'_>,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> sqlx::Result<bool> {
        let result =
            sqlx::query("DELETE FROM conversation_members WHERE conversation_id = ? AND user_id = ?")
                .bind(conversation_id)
                .bind(user_id)
                .execute(executor)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn load_members(
        executor: impl SqliteExecutor<'_>,
        conversation_id: &ConversationId,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as(
            "SELECT conversation_id, user_id, role, joined_at
            FROM conversation_members
            WHERE conversation_id = ?
            ORDER BY joined_at ASC, user_id ASC",
        )
        .bind(conversation_id)
        .fetch_all(executor)
        .await
    }

    pub(crate) async fn role_of(
        executor: impl SqliteExecutor<'_>,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> sqlx::Result<Option<MemberRole>> {
        sqlx::query_scalar(
            "SELECT role FROM conversation_members WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await
    }

    /// Promotes the longest-standing member other than `leaving_user` to
    /// admin. Returns the promoted member, if any remain.
    pub(crate) async fn transfer_admin(
        executor: impl SqliteExecutor<'_>,
        conversation_id: &ConversationId,
        leaving_user: &UserId,
    ) -> sqlx::Result<Option<UserId>> {
        sqlx::query_scalar(
            "UPDATE conversation_members SET role = 'admin'
            WHERE conversation_id = ?1 AND user_id = (
                SELECT user_id FROM conversation_members
                WHERE conversation_id = ?1 AND user_id <> ?2
                ORDER BY joined_at ASC, user_id ASC
                LIMIT 1
            )
            RETURNING user_id",
        )
        .bind(conversation_id)
        .bind(leaving_user)
        .fetch_optional(executor)
        .await
    }
}
