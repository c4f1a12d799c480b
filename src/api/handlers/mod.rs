//! API handlers and shared request validation.
//!
//! Handlers resolve the caller through [`auth::require_auth`], check the role
//! they serve, and talk to collaborators only through the [`AppState`] traits.

pub mod accounts;
pub mod assignments;
pub mod auth;
pub mod directory;
pub mod health;
pub mod media;
pub mod messages;
pub mod notifications;
pub mod recovery;
pub mod verification;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use uuid::Uuid;

use crate::{
    api::{error::ApiError, state::AppState},
    domain::{Account, Role},
};

/// Lightweight email sanity check: `local@domain.tld`.
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Phone numbers are exactly ten ASCII digits.
pub fn valid_phone(phone_number: &str) -> bool {
    Regex::new(r"^[0-9]{10}$").is_ok_and(|re| re.is_match(phone_number))
}

/// Age in whole calendar years for an ISO `YYYY-MM-DD` birth date.
///
/// Returns `None` for unparsable dates and dates after `today`.
pub fn age_on(birth_date: &str, today: NaiveDate) -> Option<i32> {
    let birth = NaiveDate::parse_from_str(birth_date.trim(), "%Y-%m-%d").ok()?;
    if birth > today {
        return None;
    }
    Some(today.year() - birth.year())
}

/// Parse a role path segment (`student`, `teachers`, `local-admins`, ...).
pub(crate) fn parse_role(segment: &str) -> Result<Role, ApiError> {
    segment
        .parse::<Role>()
        .map_err(|_| ApiError::not_found("Not Found"))
}

/// Parse an account id path segment; malformed ids cannot exist.
pub(crate) fn parse_account_id(segment: &str, missing: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(segment.trim()).map_err(|_| ApiError::not_found(missing))
}

/// Load an account or fail with 404 `missing`.
pub(crate) async fn load_account(
    state: &AppState,
    role: Role,
    id: Uuid,
    missing: &str,
) -> Result<Account, ApiError> {
    state
        .store()
        .find_account(role, id)
        .await?
        .ok_or_else(|| ApiError::not_found(missing))
}

/// Trimmed, non-blank string field.
pub(crate) fn required(value: Option<&str>, field: &str) -> Result<String, ApiError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::validation(format!("Missing field: {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap_or_default()
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("a@example"));
        assert!(!valid_email("a b@example.com"));
    }

    #[test]
    fn phone_numbers_need_ten_digits() {
        assert!(valid_phone("9876543210"));
        assert!(!valid_phone("987654321"));
        assert!(!valid_phone("98765432101"));
        assert!(!valid_phone("98765x3210"));
    }

    #[test]
    fn age_uses_calendar_years() {
        let today = date("2024-06-01");
        assert_eq!(age_on("2010-12-31", today), Some(14));
        assert_eq!(age_on("2024-06-01", today), Some(0));
        assert_eq!(age_on("2024-06-02", today), None);
        assert_eq!(age_on("01/02/2010", today), None);
    }

    #[test]
    fn role_segments_accept_both_spellings() {
        assert!(matches!(parse_role("local-admins"), Ok(Role::LocalAdmin)));
        assert!(matches!(parse_role("teacher"), Ok(Role::Teacher)));
        assert!(parse_role("janitor").is_err());
    }

    #[test]
    fn required_rejects_blank_values() {
        assert!(required(Some("  "), "name").is_err());
        assert!(required(None, "name").is_err());
        assert!(matches!(required(Some(" Asha "), "name").as_deref(), Ok("Asha")));
    }
}
