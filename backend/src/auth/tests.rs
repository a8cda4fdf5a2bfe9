// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use havencommon::time;
use sqlx::SqlitePool;

use crate::{settings::AuthSettings, store::ChallengeKind};

use super::*;

fn test_settings() -> AuthSettings {
    AuthSettings {
        rp_id: "localhost".to_owned(),
        rp_display_name: "Haven Test".to_owned(),
        rp_origins: vec!["http://localhost:8080".to_owned()],
        session_lifetime_secs: 3600,
        registration_challenge_ttl_secs: 60,
        login_challenge_ttl_secs: 30,
        key_package_lifetime_secs: 3600,
    }
}

async fn auth(pool: SqlitePool) -> (AuthService, Store) {
    let store = Store::from_pool(pool).await.expect("store setup failed");
    let auth = AuthService::new(store.clone(), test_settings()).expect("auth setup failed");
    (auth, store)
}

#[sqlx::test]
async fn begin_registration_persists_a_single_use_challenge(
    pool: SqlitePool,
) -> anyhow::Result<()> {
    let (auth, store) = auth(pool).await;

    let (challenge_id, options) = auth.begin_registration("alice", "Alice").await?;
    assert!(!options.is_empty());

    let challenge = store.get_challenge(&challenge_id).await?;
    assert_eq!(challenge.kind, ChallengeKind::Registration);
    assert_eq!(challenge.username.as_deref(), Some("alice"));
    let ttl = challenge.expires_at - time::now_secs();
    assert!((50..=60).contains(&ttl), "unexpected ttl {ttl}");

    // A finish attempt with a garbage response fails and still consumes the
    // challenge.
    let result = auth.finish_registration(&challenge_id, b"not json").await;
    assert!(matches!(result, Err(AuthError::RegistrationFailed)));
    let result = auth.finish_registration(&challenge_id, b"not json").await;
    assert!(matches!(result, Err(AuthError::ChallengeNotFound)));
    Ok(())
}

#[sqlx::test]
async fn begin_registration_rejects_taken_username(pool: SqlitePool) -> anyhow::Result<()> {
    let (auth, store) = auth(pool).await;
    store.create_user("alice", "Alice").await?;

    let result = auth.begin_registration("alice", "A").await;
    assert!(matches!(result, Err(AuthError::RegistrationFailed)));
    Ok(())
}

#[sqlx::test]
async fn begin_login_screens_the_account(pool: SqlitePool) -> anyhow::Result<()> {
    let (auth, store) = auth(pool).await;

    assert!(matches!(
        auth.begin_login("nobody").await,
        Err(AuthError::UserNotFound)
    ));

    // A user without credentials cannot start a ceremony.
    let alice = store.create_user("alice", "Alice").await?;
    assert!(matches!(
        auth.begin_login("alice").await,
        Err(AuthError::InvalidCredential)
    ));

    // A disabled account is rejected before anything else.
    store
        .update_user(&alice.id, "Alice", crate::store::UserRole::Member, false)
        .await?;
    assert!(matches!(
        auth.begin_login("alice").await,
        Err(AuthError::AccountDisabled)
    ));
    Ok(())
}

#[sqlx::test]
async fn expired_login_challenge_is_rejected_and_consumed(
    pool: SqlitePool,
) -> anyhow::Result<()> {
    let (auth, store) = auth(pool).await;

    // Seed an already-expired challenge directly; the ceremony state does
    // not matter because expiry is checked first.
    let challenge = store
        .create_challenge(vec![1], None, ChallengeKind::Login, -5)
        .await?;

    let result = auth.finish_login(&challenge.id, b"{}").await;
    assert!(matches!(result, Err(AuthError::ChallengeExpired)));
    assert!(matches!(
        auth.finish_login(&challenge.id, b"{}").await,
        Err(AuthError::ChallengeNotFound)
    ));
    Ok(())
}

#[sqlx::test]
async fn session_tokens_validate_and_revoke(pool: SqlitePool) -> anyhow::Result<()> {
    let (auth, store) = auth(pool).await;
    let alice = store.create_user("alice", "Alice").await?;

    let token = auth.issue_session(&alice.id, None).await?;
    let (session, user) = auth.validate_session(token.as_str()).await?;
    assert_eq!(user.id, alice.id);
    assert_eq!(user.username, "alice");
    assert_eq!(user.display_name, "Alice");

    // The raw token is not what the store holds.
    assert!(matches!(
        store.get_session_by_token_hash(token.as_str()).await,
        Err(crate::errors::StoreError::NotFound)
    ));
    assert!(store.get_session_by_token_hash(&token.hash()).await.is_ok());

    auth.revoke_session(&session.id).await?;
    assert!(matches!(
        auth.validate_session(token.as_str()).await,
        Err(AuthError::InvalidCredential)
    ));
    // Revocation is idempotent.
    auth.revoke_session(&session.id).await?;
    Ok(())
}

#[sqlx::test]
async fn expired_sessions_are_rejected_and_deleted(pool: SqlitePool) -> anyhow::Result<()> {
    let (auth, store) = auth(pool).await;
    let alice = store.create_user("alice", "Alice").await?;

    let token = SessionToken::generate();
    store
        .create_session(alice.id.clone(), None, token.hash(), -10)
        .await?;

    assert!(matches!(
        auth.validate_session(token.as_str()).await,
        Err(AuthError::SessionExpired)
    ));
    // The expired row was removed on sight.
    assert!(matches!(
        store.get_session_by_token_hash(&token.hash()).await,
        Err(crate::errors::StoreError::NotFound)
    ));
    Ok(())
}

#[sqlx::test]
async fn disabled_accounts_cannot_resume_sessions(pool: SqlitePool) -> anyhow::Result<()> {
    let (auth, store) = auth(pool).await;
    let alice = store.create_user("alice", "Alice").await?;
    let token = auth.issue_session(&alice.id, None).await?;

    store
        .update_user(&alice.id, "Alice", crate::store::UserRole::Member, false)
        .await?;
    assert!(matches!(
        auth.validate_session(token.as_str()).await,
        Err(AuthError::AccountDisabled)
    ));
    Ok(())
}

#[test]
fn sign_count_rule_detects_clones() {
    // Counter-less authenticators always report zero.
    assert!(check_sign_count(0, 0).is_ok());
    assert!(check_sign_count(0, 1).is_ok());
    assert!(check_sign_count(5, 6).is_ok());
    // A non-increasing counter on a counter-bearing credential is a clone.
    assert!(matches!(
        check_sign_count(5, 5),
        Err(AuthError::CloneDetected)
    ));
    assert!(matches!(
        check_sign_count(5, 4),
        Err(AuthError::CloneDetected)
    ));
    assert!(matches!(
        check_sign_count(1, 0),
        Err(AuthError::CloneDetected)
    ));
}
