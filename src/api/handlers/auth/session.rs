//! Session registry: issue and revoke.
//!
//! Each account holds at most one live session. Issuing a new token replaces
//! the stored digest, which invalidates whatever token was issued before.

use anyhow::Result;
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use tracing::debug;
use ulid::Ulid;
use uuid::Uuid;

use super::{
    token::SessionClaims,
    utils::{extract_bearer_token, hash_session_token},
};
use crate::{api::state::AppState, domain::Role, store::SessionRecord};

/// Sign a token for the account and make it the account's only live session.
pub async fn issue_session(state: &AppState, account_id: Uuid, role: Role) -> Result<String> {
    let now = Utc::now();
    let expires_at = now + Duration::seconds(state.config().session_ttl_seconds());
    let claims = SessionClaims {
        role,
        account_id,
        jti: Ulid::new().to_string(),
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
    };
    let token = state.tokens().issue(&claims)?;

    state
        .store()
        .upsert_session(&SessionRecord {
            account_id,
            role,
            token_hash: hash_session_token(&token),
            created_at: now,
            expires_at,
        })
        .await?;

    Ok(token)
}

/// Delete the session presented in `headers` for `account_id` under `role`.
///
/// Returns `false` when the token is absent or invalid, belongs to another
/// account or role, or no longer matches the registry.
pub async fn revoke_session(
    state: &AppState,
    headers: &HeaderMap,
    role: Role,
    account_id: Uuid,
) -> Result<bool> {
    let Some(token) = extract_bearer_token(headers) else {
        return Ok(false);
    };
    let claims = match state.tokens().verify(&token) {
        Ok(claims) => claims,
        Err(err) => {
            debug!("logout with unusable token: {err}");
            return Ok(false);
        }
    };
    if claims.account_id != account_id || claims.role != role {
        return Ok(false);
    }

    state
        .store()
        .delete_session(account_id, &hash_session_token(&token))
        .await
}
