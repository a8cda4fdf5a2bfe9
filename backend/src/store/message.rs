// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use havencommon::{
    identifiers::{ConversationId, MessageId, UserId},
    protocol::{DeliveryStatus, MessageKind},
    time,
};
use sqlx::{SqliteConnection, SqliteExecutor};

/// Paging direction for [`MessageRecord::page_for_conversation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    /// Messages older than the cursor, newest first.
    Backward,
    /// Messages newer than the cursor, oldest first.
    Forward,
}

pub(crate) const PAGE_LIMIT_DEFAULT: i64 = 50;
pub(crate) const PAGE_LIMIT_MAX: i64 = 200;

/// A persisted ciphertext message. The payload is opaque to the server.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// Unix microseconds; strictly monotonic across all inserted messages.
    pub server_timestamp: i64,
    pub payload: Vec<u8>,
    pub payload_size: i64,
    pub message_type: MessageKind,
    pub epoch: i64,
    pub created_at: i64,
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, server_timestamp, \
     payload, payload_size, message_type, epoch, created_at";

impl MessageRecord {
    /// Inserts the message and one pending delivery row per non-sender
    /// member of the conversation. Must run inside the caller's transaction.
    pub(crate) async fn insert_with_delivery_rows(
        connection: &mut SqliteConnection,
        message: &MessageRecord,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO messages
                (id, conversation_id, sender_id, server_timestamp,
                 payload, payload_size, message_type, epoch, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(message.server_timestamp)
        .bind(&message.payload)
        .bind(message.payload_size)
        .bind(message.message_type)
        .bind(message.epoch)
        .bind(message.created_at)
        .execute(&mut *connection)
        .await?;

        sqlx::query(
            "INSERT INTO delivery_status (message_id, recipient_id, status)
            SELECT ?1, user_id, 0 FROM conversation_members
            WHERE conversation_id = ?2 AND user_id <> ?3",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .execute(&mut *connection)
        .await?;

        Ok(())
    }

    pub(crate) async fn load(
        executor: impl SqliteExecutor<'_>,
        message_id: &MessageId,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(message_id)
        .fetch_optional(executor)
        .await
    }

    /// Cursor-stable page of a conversation's messages. An absent cursor
    /// means the latest page (backward) or the earliest (forward).
    pub(crate) async fn page_for_conversation(
        executor: impl SqliteExecutor<'_>,
        conversation_id: &ConversationId,
        cursor: Option<&MessageId>,
        limit: i64,
        direction: PageDirection,
    ) -> sqlx::Result<Vec<Self>> {
        let query = match (direction, cursor) {
            (PageDirection::Backward, Some(_)) => format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                WHERE conversation_id = ? AND id < ? ORDER BY id DESC LIMIT ?"
            ),
            (PageDirection::Backward, None) => format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                WHERE conversation_id = ? ORDER BY id DESC LIMIT ?"
            ),
            (PageDirection::Forward, Some(_)) => format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                WHERE conversation_id = ? AND id > ? ORDER BY id ASC LIMIT ?"
            ),
            (PageDirection::Forward, None) => format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                WHERE conversation_id = ? ORDER BY id ASC LIMIT ?"
            ),
        };
        let mut q = sqlx::query_as(&query).bind(conversation_id);
        if let Some(cursor) = cursor {
            q = q.bind(cursor);
        }
        q.bind(limit).fetch_all(executor).await
    }

    /// All messages with a pending delivery row for `recipient`, oldest
    /// first.
    pub(crate) async fn load_pending_for(
        executor: impl SqliteExecutor<'_>,
        recipient: &UserId,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as(
            "SELECT m.id, m.conversation_id, m.sender_id, m.server_timestamp,
                m.payload, m.payload_size, m.message_type, m.epoch, m.created_at
            FROM messages m
            INNER JOIN delivery_status d ON d.message_id = m.id
            WHERE d.recipient_id = ? AND d.status = 0
            ORDER BY m.server_timestamp ASC",
        )
        .bind(recipient)
        .fetch_all(executor)
        .await
    }

    pub(crate) async fn delete_older_than(
        executor: impl SqliteExecutor<'_>,
        cutoff_micros: i64,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE server_timestamp < ?")
            .bind(cutoff_micros)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct DeliveryRecord {
    pub message_id: MessageId,
    pub recipient_id: UserId,
    pub status: DeliveryStatus,
    pub delivered_at: Option<i64>,
    pub read_at: Option<i64>,
}

/// Outcome of a delivery status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryTransition {
    /// The row advanced to the requested status.
    Advanced,
    /// The row was already at or beyond the requested status.
    Unchanged,
}

impl DeliveryRecord {
    pub(crate) async fn load(
        executor: impl SqliteExecutor<'_>,
        message_id: &MessageId,
        recipient_id: &UserId,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            "SELECT message_id, recipient_id, status, delivered_at, read_at
            FROM delivery_status WHERE message_id = ? AND recipient_id = ?",
        )
        .bind(message_id)
        .bind(recipient_id)
        .fetch_optional(executor)
        .await
    }

    /// Monotonic state transition. `delivered_at` is stamped on the first
    /// transition to delivered or beyond, `read_at` on the transition to
    /// read. Must run inside the caller's transaction; returns None if no
    /// delivery row exists.
    pub(crate) async fn advance(
        connection: &mut SqliteConnection,
        message_id: &MessageId,
        recipient_id: &UserId,
        new_status: DeliveryStatus,
    ) -> sqlx::Result<Option<DeliveryTransition>> {
        let Some(current) = Self::load(&mut *connection, message_id, recipient_id).await? else {
            return Ok(None);
        };
        if new_status <= current.status {
            return Ok(Some(DeliveryTransition::Unchanged));
        }

        let now = time::now_secs();
        let delivered_at = current.delivered_at.or_else(|| {
            (new_status >= DeliveryStatus::Delivered).then_some(now)
        });
        let read_at = current
            .read_at
            .or_else(|| (new_status == DeliveryStatus::Read).then_some(now));

        sqlx::query(
            "UPDATE delivery_status SET status = ?, delivered_at = ?, read_at = ?
            WHERE message_id = ? AND recipient_id = ?",
        )
        .bind(new_status)
        .bind(delivered_at)
        .bind(read_at)
        .bind(message_id)
        .bind(recipient_id)
        .execute(&mut *connection)
        .await?;

        Ok(Some(DeliveryTransition::Advanced))
    }

    #[cfg(test)]
    pub(crate) async fn count_for_message(
        executor: impl SqliteExecutor<'_>,
        message_id: &MessageId,
    ) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM delivery_status WHERE message_id = ?")
            .bind(message_id)
            .fetch_one(executor)
            .await
    }
}
