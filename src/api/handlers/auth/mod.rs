//! Credentials, sessions and the authorization gate.
//!
//! - Passwords are Argon2id hashes with a random salt.
//! - Sessions are HS256 tokens carrying `{role, accountId, iat, exp}`; the
//!   store keeps one SHA-256 digest per account, so a new login revokes the
//!   previous token.
//! - Every protected handler calls [`require_auth`] with the request headers
//!   (`Authorization: Bearer` plus `X-Account-Id`) and then checks the role it
//!   needs on the returned [`Principal`].

pub mod password;
pub mod principal;
pub mod session;
pub mod token;
pub mod utils;

pub use principal::{GateError, Principal, require_auth};
pub use session::{issue_session, revoke_session};
pub use token::{SessionClaims, TokenCodec, TokenError};
