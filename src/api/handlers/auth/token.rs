//! HS256 session tokens.

use anyhow::{Context, Result};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::Role;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub role: Role,
    pub account_id: Uuid,
    /// Unique per issue, so two logins within the same second differ.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

/// Signs and verifies session tokens with a shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation,
        }
    }

    /// # Errors
    /// Returns an error if the claims cannot be signed.
    pub fn issue(&self, claims: &SessionClaims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .context("failed to sign session token")
    }

    /// # Errors
    /// Returns [`TokenError::Expired`] for stale tokens and
    /// [`TokenError::Invalid`] for bad signatures or malformed claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn codec(secret: &str) -> TokenCodec {
        TokenCodec::new(&SecretString::from(secret.to_string()))
    }

    fn claims(exp_offset: i64) -> SessionClaims {
        let now = Utc::now().timestamp();
        SessionClaims {
            role: Role::Teacher,
            account_id: Uuid::new_v4(),
            jti: "01J0000000000000000000000".to_string(),
            iat: now,
            exp: now + exp_offset,
        }
    }

    #[test]
    fn issued_tokens_verify() -> Result<()> {
        let codec = codec("secret");
        let claims = claims(60);
        let token = codec.issue(&claims)?;
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(codec.verify(&token), Ok(claims));
        Ok(())
    }

    #[test]
    fn expired_tokens_are_reported_as_expired() -> Result<()> {
        let codec = codec("secret");
        let token = codec.issue(&claims(-120))?;
        assert_eq!(codec.verify(&token), Err(TokenError::Expired));
        Ok(())
    }

    #[test]
    fn foreign_signatures_are_invalid() -> Result<()> {
        let token = codec("secret").issue(&claims(60))?;
        assert_eq!(codec("other").verify(&token), Err(TokenError::Invalid));
        Ok(())
    }
}
