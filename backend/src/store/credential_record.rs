// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use havencommon::{
    identifiers::{CredentialId, UserId},
    time,
};
use sqlx::SqliteExecutor;

/// A registered public-key credential. `external_id` is the authenticator's
/// credential identifier and is globally unique; `passkey` is the serialized
/// verifier state produced by the credential library.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CredentialRecord {
    pub id: CredentialId,
    pub user_id: UserId,
    pub external_id: Vec<u8>,
    pub passkey: Vec<u8>,
    pub sign_count: i64,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
}

impl CredentialRecord {
    pub(crate) fn new(
        user_id: UserId,
        external_id: Vec<u8>,
        passkey: Vec<u8>,
        sign_count: i64,
    ) -> Self {
        Self {
            id: CredentialId::random(),
            user_id,
            external_id,
            passkey,
            sign_count,
            created_at: time::now_secs(),
            last_used_at: None,
        }
    }

    pub(crate) async fn store(&self, executor: impl SqliteExecutor<'_>) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO credentials
                (id, user_id, external_id, passkey, sign_count, created_at, last_used_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.id)
        .bind(&self.user_id)
        .bind(&self.external_id)
        .bind(&self.passkey)
        .bind(self.sign_count)
        .bind(self.created_at)
        .bind(self.last_used_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub(crate) async fn load_by_external_id(
        executor: impl SqliteExecutor<'_>,
        external_id: &[u8],
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            "SELECT id, user_id, external_id, passkey, sign_count, created_at, last_used_at
            FROM credentials WHERE external_id = ?",
        )
        .bind(external_id)
        .fetch_optional(executor)
        .await
    }

    pub(crate) async fn load_for_user(
        executor: impl SqliteExecutor<'_>,
        user_id: &UserId,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as(
            "SELECT id, user_id, external_id, passkey, sign_count, created_at, last_used_at
            FROM credentials WHERE user_id = ? ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(executor)
        .await
    }

    /// Sets the signature counter and stamps `last_used_at`. The caller is
    /// responsible for checking monotonicity beforehand. Returns false if
    /// the credential does not exist.
    pub(crate) async fn update_sign_count(
        executor: impl SqliteExecutor<'_>,
        credential_id: &CredentialId,
        sign_count: i64,
    ) -> sqlx::Result<bool> {
        let result =
            sqlx::query("UPDATE credentials SET sign_count = ?, last_used_at = ? WHERE id = ?")
                .bind(sign_count)
                .bind(time::now_secs())
                .bind(credential_id)
                .execute(executor)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
