//! Records shared by the API handlers and the storage backends.
//!
//! Everything in here is plain data plus the pure rules that operate on it
//! (grading, reply ordering, vote toggling, notification coalescing), so both
//! the PostgreSQL and the in-memory store apply identical semantics.

pub mod account;
pub mod assignment;
pub mod message;
pub mod notification;

pub use account::{Account, AccountUpdate, Profile, Role, VerificationStatus};
pub use assignment::{Assignment, Question, Score, Submission, grade};
pub use message::{MessageThread, Reply, SenderKind, VoteDirection, order_replies};
pub use notification::{Notification, NotificationEvent};

/// Owner part of a composite id such as `{accountId}@{nonce}`.
///
/// Returns `None` when the separator is missing or either side is blank.
#[must_use]
pub fn composite_owner(id: &str) -> Option<&str> {
    let (owner, nonce) = id.split_once('@')?;
    if owner.trim().is_empty() || nonce.trim().is_empty() {
        return None;
    }
    Some(owner)
}

#[cfg(test)]
mod tests {
    use super::composite_owner;

    #[test]
    fn composite_owner_splits_on_first_separator() {
        assert_eq!(composite_owner("abc@123"), Some("abc"));
        assert_eq!(composite_owner("abc@123@456"), Some("abc"));
    }

    #[test]
    fn composite_owner_rejects_incomplete_ids() {
        assert_eq!(composite_owner("abc"), None);
        assert_eq!(composite_owner("@123"), None);
        assert_eq!(composite_owner("abc@"), None);
    }
}
