// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Registration and login ceremonies, session issue/validate/revoke and the
//! challenge lifecycle.
//!
//! The server never sees key material: ceremony verification is delegated to
//! the credential library, whose opaque state is persisted in the challenge
//! row between `begin` and `finish`. Challenges are single-use; any finish
//! attempt consumes the row, successful or not.

use havencommon::{
    codec,
    identifiers::{ChallengeId, SessionId, UserId},
    time,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;
use webauthn_rs::{
    Webauthn, WebauthnBuilder,
    prelude::{
        PasskeyAuthentication, PasskeyRegistration, PublicKeyCredential,
        RegisterPublicKeyCredential, Url,
    },
};

use crate::{
    errors::StoreError,
    settings::AuthSettings,
    store::{ChallengeKind, SessionRecord, Store, UserRecord},
};

mod errors;
mod session_token;

pub use errors::AuthError;
pub use session_token::SessionToken;

/// Opaque ceremony state persisted in the challenge row.
#[derive(Serialize, Deserialize)]
enum ChallengeState {
    Registration {
        user_id: UserId,
        username: String,
        display_name: String,
        state: PasskeyRegistration,
    },
    Login {
        user_id: UserId,
        state: PasskeyAuthentication,
    },
}

#[derive(Clone)]
pub struct AuthService {
    store: Store,
    webauthn: std::sync::Arc<Webauthn>,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(store: Store, settings: AuthSettings) -> Result<Self, AuthError> {
        let mut origins = settings.rp_origins.iter();
        let first_origin = origins
            .next()
            .ok_or_else(|| AuthError::Configuration("no relying party origin".to_owned()))?;
        let first_origin = Url::parse(first_origin)
            .map_err(|e| AuthError::Configuration(format!("origin {first_origin}: {e}")))?;

        let mut builder = WebauthnBuilder::new(&settings.rp_id, &first_origin)
            .map_err(|e| AuthError::Configuration(e.to_string()))?
            .rp_name(&settings.rp_display_name);
        for origin in origins {
            let origin = Url::parse(origin)
                .map_err(|e| AuthError::Configuration(format!("origin {origin}: {e}")))?;
            builder = builder.append_allowed_origin(&origin);
        }
        let webauthn = builder
            .build()
            .map_err(|e| AuthError::Configuration(e.to_string()))?;

        Ok(Self {
            store,
            webauthn: std::sync::Arc::new(webauthn),
            settings,
        })
    }

    // === Registration ===

    /// Starts a registration ceremony. Returns the challenge id and the
    /// JSON-encoded creation options the client hands to its authenticator.
    pub async fn begin_registration(
        &self,
        username: &str,
        display_name: &str,
    ) -> Result<(ChallengeId, Vec<u8>), AuthError> {
        match self.store.get_user_by_username(username).await {
            Ok(_) => return Err(AuthError::RegistrationFailed),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        // The user id is minted now so it can be bound into the ceremony.
        let user_uuid = Uuid::new_v4();
        let user_id = UserId::from(user_uuid.to_string());

        let (creation_options, state) = self
            .webauthn
            .start_passkey_registration(user_uuid, username, display_name, None)
            .map_err(|e| {
                debug!(error = %e, "start registration ceremony failed");
                AuthError::RegistrationFailed
            })?;

        let challenge_state = ChallengeState::Registration {
            user_id,
            username: username.to_owned(),
            display_name: display_name.to_owned(),
            state,
        };
        let challenge = self
            .store
            .create_challenge(
                codec::to_vec(&challenge_state)?,
                Some(username.to_owned()),
                ChallengeKind::Registration,
                self.settings.registration_challenge_ttl_secs,
            )
            .await?;

        info!(challenge_id = %challenge.id, username, "registration ceremony started");
        Ok((challenge.id, serde_json::to_vec(&creation_options)?))
    }

    /// Finishes a registration ceremony: verifies the authenticator response,
    /// then creates user, credential and session in one flow.
    pub async fn finish_registration(
        &self,
        challenge_id: &ChallengeId,
        credential_json: &[u8],
    ) -> Result<(SessionToken, UserRecord), AuthError> {
        let challenge = self.consume_challenge(challenge_id).await?;

        let ChallengeState::Registration {
            user_id,
            username,
            display_name,
            state,
        } = codec::from_slice(&challenge.state)?
        else {
            return Err(AuthError::ChallengeNotFound);
        };

        let response: RegisterPublicKeyCredential = serde_json::from_slice(credential_json)
            .map_err(|_| AuthError::RegistrationFailed)?;
        let passkey = self
            .webauthn
            .finish_passkey_registration(&response, &state)
            .map_err(|e| {
                debug!(error = %e, "registration ceremony verification failed");
                AuthError::RegistrationFailed
            })?;

        let external_id = passkey.cred_id().to_vec();
        let (user, credential) = self
            .store
            .register_user(
                user_id,
                &username,
                &display_name,
                external_id,
                codec::to_vec(&passkey)?,
                0,
            )
            .await
            .map_err(|e| match e {
                StoreError::Conflict => AuthError::RegistrationFailed,
                other => other.into(),
            })?;

        let token = self.issue_session(&user.id, Some(&credential.id)).await?;
        info!(user_id = %user.id, username = %user.username, "registration complete");
        Ok((token, user))
    }

    // === Login ===

    /// Starts a login ceremony. Returns the challenge id and the
    /// JSON-encoded request options.
    pub async fn begin_login(&self, username: &str) -> Result<(ChallengeId, Vec<u8>), AuthError> {
        let user = self
            .store
            .get_user_by_username(username)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AuthError::UserNotFound,
                other => other.into(),
            })?;
        if !user.enabled {
            return Err(AuthError::AccountDisabled);
        }

        let credentials = self.store.get_credentials_for_user(&user.id).await?;
        if credentials.is_empty() {
            return Err(AuthError::InvalidCredential);
        }
        let passkeys = credentials
            .iter()
            .map(|credential| codec::from_slice(&credential.passkey))
            .collect::<Result<Vec<_>, _>>()?;

        let (request_options, state) = self
            .webauthn
            .start_passkey_authentication(&passkeys)
            .map_err(|e| {
                debug!(error = %e, "start login ceremony failed");
                AuthError::InvalidCredential
            })?;

        let challenge = self
            .store
            .create_challenge(
                codec::to_vec(&ChallengeState::Login {
                    user_id: user.id.clone(),
                    state,
                })?,
                Some(username.to_owned()),
                ChallengeKind::Login,
                self.settings.login_challenge_ttl_secs,
            )
            .await?;

        info!(challenge_id = %challenge.id, username, "login ceremony started");
        Ok((challenge.id, serde_json::to_vec(&request_options)?))
    }

    /// Finishes a login ceremony. A verified assertion whose signature
    /// counter does not increase fails with `CloneDetected` and mutates
    /// nothing.
    pub async fn finish_login(
        &self,
        challenge_id: &ChallengeId,
        credential_json: &[u8],
    ) -> Result<(SessionToken, UserRecord), AuthError> {
        let challenge = self.consume_challenge(challenge_id).await?;

        let ChallengeState::Login { user_id, state } = codec::from_slice(&challenge.state)? else {
            return Err(AuthError::ChallengeNotFound);
        };

        // Reload the user: the account may have been disabled since `begin`.
        let user = self
            .store
            .get_user_by_id(&user_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AuthError::UserNotFound,
                other => other.into(),
            })?;
        if !user.enabled {
            return Err(AuthError::AccountDisabled);
        }

        let response: PublicKeyCredential =
            serde_json::from_slice(credential_json).map_err(|_| AuthError::InvalidCredential)?;
        let result = self
            .webauthn
            .finish_passkey_authentication(&response, &state)
            .map_err(|e| {
                debug!(error = %e, "login ceremony verification failed");
                AuthError::InvalidCredential
            })?;

        let credential = self
            .store
            .get_credential_by_external_id(&result.cred_id().to_vec())
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AuthError::InvalidCredential,
                other => other.into(),
            })?;
        if credential.user_id != user.id {
            return Err(AuthError::InvalidCredential);
        }

        check_sign_count(credential.sign_count, result.counter())?;
        self.store
            .update_sign_count(&credential.id, i64::from(result.counter()))
            .await?;

        let token = self.issue_session(&user.id, Some(&credential.id)).await?;
        info!(user_id = %user.id, username = %user.username, "login complete");
        Ok((token, user))
    }

    // === Sessions ===

    /// Issues a fresh session for the user and returns the raw token. The
    /// store only ever sees the token's hash.
    pub async fn issue_session(
        &self,
        user_id: &UserId,
        credential_id: Option<&havencommon::identifiers::CredentialId>,
    ) -> Result<SessionToken, AuthError> {
        let token = SessionToken::generate();
        self.store
            .create_session(
                user_id.clone(),
                credential_id.cloned(),
                token.hash(),
                self.settings.session_lifetime_secs,
            )
            .await?;
        Ok(token)
    }

    /// Validates a raw session token and returns the session and its user.
    /// Expired sessions are deleted on sight.
    pub async fn validate_session(
        &self,
        raw_token: &str,
    ) -> Result<(SessionRecord, UserRecord), AuthError> {
        let token = SessionToken::from_raw(raw_token);
        let session = self
            .store
            .get_session_by_token_hash(&token.hash())
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AuthError::InvalidCredential,
                other => other.into(),
            })?;

        if session.is_expired(time::now_secs()) {
            // Best effort; the sweeper would collect it anyway.
            let _ = self.store.delete_session(&session.id).await;
            return Err(AuthError::SessionExpired);
        }

        let user = self
            .store
            .get_user_by_id(&session.user_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AuthError::InvalidCredential,
                other => other.into(),
            })?;
        if !user.enabled {
            return Err(AuthError::AccountDisabled);
        }

        self.store
            .update_session_last_used(&session.id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AuthError::InvalidCredential,
                other => other.into(),
            })?;

        Ok((session, user))
    }

    /// Revoking an already-deleted session is a success: logout is
    /// idempotent.
    pub async fn revoke_session(&self, session_id: &SessionId) -> Result<(), AuthError> {
        match self.store.delete_session(session_id).await {
            Ok(()) | Err(StoreError::NotFound) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    /// Loads a challenge and deletes it, whatever happens next.
    async fn consume_challenge(
        &self,
        challenge_id: &ChallengeId,
    ) -> Result<crate::store::ChallengeRecord, AuthError> {
        let challenge = self
            .store
            .get_challenge(challenge_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AuthError::ChallengeNotFound,
                other => other.into(),
            })?;
        self.store.delete_challenge(challenge_id).await?;

        if challenge.is_expired(time::now_secs()) {
            return Err(AuthError::ChallengeExpired);
        }
        Ok(challenge)
    }
}

/// The clone-detection rule: a verified assertion must report a strictly
/// increasing counter, except that counter-less authenticators always report
/// zero.
fn check_sign_count(stored: i64, reported: u32) -> Result<(), AuthError> {
    let reported = i64::from(reported);
    if stored == 0 && reported == 0 {
        return Ok(());
    }
    if reported <= stored {
        return Err(AuthError::CloneDetected);
    }
    Ok(())
}

#[cfg(test)]
mod tests;
