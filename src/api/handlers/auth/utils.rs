//! Small helpers for header extraction, token digests and one-time codes.

use axum::http::HeaderMap;
use rand::{Rng, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

pub const ACCOUNT_ID_HEADER: &str = "x-account-id";

/// Hash a session token so raw values never touch the store.
pub(crate) fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Hash a one-time password; only the digest is persisted.
pub(crate) fn hash_otp(otp: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(otp.trim().as_bytes());
    hasher.finalize().to_vec()
}

/// Six decimal digits, zero padded.
pub(crate) fn generate_otp() -> String {
    let code: u32 = OsRng.gen_range(0..1_000_000);
    format!("{code:06}")
}

/// Three dot-separated base64url segments.
pub(crate) fn well_formed_token(token: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+$")
        .is_ok_and(|regex| regex.is_match(token))
}

/// Extract a bearer token from the Authorization header.
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// The account id the caller claims to act as.
pub(crate) fn extract_account_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ACCOUNT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_accepts_both_cases() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc.def.ghi"));

        headers.insert("authorization", HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn account_id_header_is_trimmed() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_account_id(&headers), None);
        headers.insert(ACCOUNT_ID_HEADER, HeaderValue::from_static(" id-1 "));
        assert_eq!(extract_account_id(&headers).as_deref(), Some("id-1"));
    }

    #[test]
    fn token_shape() {
        assert!(well_formed_token("eyJh.eyJz.sig-_x"));
        assert!(!well_formed_token("eyJh.eyJz"));
        assert!(!well_formed_token("a.b.c.d"));
        assert!(!well_formed_token("a.b.c="));
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..50 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn digests_are_stable_and_distinct() {
        assert_eq!(hash_session_token("a"), hash_session_token("a"));
        assert_ne!(hash_session_token("a"), hash_session_token("b"));
        assert_eq!(hash_otp(" 123456 "), hash_otp("123456"));
    }
}
