//! Authenticated principal extraction and authorization helpers.
//!
//! Flow: read the bearer token and the claimed account id, check the token
//! shape and signature, then require that the registry still holds this exact
//! token for that account. Role checks happen per handler on the returned
//! [`Principal`].

use axum::http::HeaderMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::{
    token::TokenError,
    utils::{extract_account_id, extract_bearer_token, hash_session_token, well_formed_token},
};
use crate::{
    api::{error::ApiError, state::AppState},
    domain::Role,
};

/// Authenticated caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    pub account_id: Uuid,
    pub role: Role,
}

impl Principal {
    /// # Errors
    /// Returns 403 when the caller has a different role.
    pub fn require_role(&self, role: Role) -> Result<(), ApiError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }

    /// # Errors
    /// Returns 403 unless the caller is exactly `account_id` acting as `role`.
    pub fn require_account(&self, role: Role, account_id: Uuid) -> Result<(), ApiError> {
        self.require_role(role)?;
        if self.account_id == account_id {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("missing credentials")]
    Unauthenticated,
    #[error("malformed token")]
    InvalidToken,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("session does not match")]
    Forbidden,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Unauthenticated | GateError::InvalidSignature | GateError::Expired => {
                Self::Unauthenticated("Not Authorized".to_string())
            }
            GateError::InvalidToken => Self::InvalidToken("Invalid Token".to_string()),
            GateError::Forbidden => Self::forbidden(),
            GateError::Unexpected(err) => Self::Unexpected(err),
        }
    }
}

/// Resolve the request credentials into a principal.
///
/// # Errors
/// Returns a [`GateError`] describing the first failed check.
pub async fn require_auth(headers: &HeaderMap, state: &AppState) -> Result<Principal, GateError> {
    let (Some(token), Some(claimed_id)) =
        (extract_bearer_token(headers), extract_account_id(headers))
    else {
        return Err(GateError::Unauthenticated);
    };

    if !well_formed_token(&token) {
        return Err(GateError::InvalidToken);
    }

    let claims = state.tokens().verify(&token).map_err(|err| match err {
        TokenError::Expired => GateError::Expired,
        TokenError::Invalid => GateError::InvalidSignature,
    })?;

    if claims.account_id.to_string() != claimed_id {
        debug!("token account does not match claimed account");
        return Err(GateError::Forbidden);
    }

    let session = state
        .store()
        .find_session(claims.account_id)
        .await?
        .ok_or(GateError::Forbidden)?;

    if session.role != claims.role || session.token_hash != hash_session_token(&token) {
        debug!("presented token is not the live session");
        return Err(GateError::Forbidden);
    }

    Ok(Principal {
        account_id: claims.account_id,
        role: claims.role,
    })
}
