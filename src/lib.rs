//! # EduResolve
//!
//! Backend for an educational Q&A and assignment platform serving five kinds
//! of accounts: students, teachers, mentors, local (institution) admins and
//! global admins.
//!
//! ## Sessions
//!
//! Login issues a signed token carrying the role and account id. A digest of
//! the token is stored per account, so logging in again invalidates the
//! previous token. Authenticated requests send `Authorization: Bearer <token>`
//! together with `X-Account-Id`; both must agree with the stored session.
//!
//! ## Verification
//!
//! Teachers, mentors and local admins start `pending` and cannot log in until
//! reviewed. Global admins review mentors and local admins; local admins
//! review teachers of their own institution.
//!
//! ## Messaging and assignments
//!
//! Students post question threads that students, teachers and mentors reply
//! to, vote on and report. A thread reaching the report threshold is removed.
//! Teachers publish assignments to a school and grade; submissions are graded
//! on the spot and every party involved is notified.

pub mod api;
pub mod cli;
pub mod domain;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
