//! Persistence boundary.
//!
//! Handlers talk to a [`Store`] trait object. [`PgStore`] is the production
//! backend; [`MemoryStore`] keeps everything in process for local runs and tests.
//! Every read-modify-write sequence (vote toggles, submissions, report
//! thresholds, notification coalescing, membership sets) is a single trait call
//! so each backend can make it atomic.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Account, AccountUpdate, Assignment, MessageThread, Notification, NotificationEvent, Reply,
    Role, Submission, VerificationStatus, VoteDirection,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome when inserting a record keyed by a caller-chosen unique value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Conflict,
}

/// Outcome of a verification decision on an existing account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// The account was pending and now holds the decision.
    Applied,
    /// The account had already left `pending`; carries its current state.
    Unchanged(VerificationStatus),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    Missing,
    Duplicate,
    Recorded { reports: usize },
    /// This report reached the threshold and the thread was deleted.
    Removed(Box<MessageThread>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Recorded,
    AlreadySubmitted,
    Missing,
}

/// Id sets tracked per account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Membership {
    Messages,
    Assignments,
}

impl Membership {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Assignments => "assignments",
        }
    }
}

/// The single live session for an account. Only a digest of the token is kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub account_id: Uuid,
    pub role: Role,
    pub token_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Pending password reset for an account. Only a digest of the OTP is kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResetTicket {
    pub account_id: Uuid,
    pub role: Role,
    pub email: String,
    pub otp_hash: Vec<u8>,
    pub failed_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountFilter {
    pub role: Role,
    pub institution: Option<String>,
    pub grade: Option<String>,
}

impl AccountFilter {
    #[must_use]
    pub const fn role(role: Role) -> Self {
        Self {
            role,
            institution: None,
            grade: None,
        }
    }

    #[must_use]
    pub fn with_institution(mut self, institution: impl Into<String>) -> Self {
        self.institution = Some(institution.into());
        self
    }

    #[must_use]
    pub fn with_grade(mut self, grade: Option<String>) -> Self {
        self.grade = grade;
        self
    }

    pub(crate) fn matches(&self, account: &Account) -> bool {
        account.role() == self.role
            && self
                .institution
                .as_deref()
                .is_none_or(|institution| account.profile.institution() == Some(institution))
            && self
                .grade
                .as_deref()
                .is_none_or(|grade| account.profile.grade() == Some(grade))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreadFilter {
    pub school: Option<String>,
    pub author_id: Option<Uuid>,
}

impl ThreadFilter {
    pub(crate) fn matches(&self, thread: &MessageThread) -> bool {
        self.school
            .as_deref()
            .is_none_or(|school| thread.school == school)
            && self.author_id.is_none_or(|author| thread.author_id == author)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssignmentFilter {
    pub school: Option<String>,
    pub grade: Option<String>,
    pub subject: Option<String>,
    pub teacher_id: Option<Uuid>,
}

impl AssignmentFilter {
    pub(crate) fn matches(&self, assignment: &Assignment) -> bool {
        self.school
            .as_deref()
            .is_none_or(|school| assignment.school == school)
            && self
                .grade
                .as_deref()
                .is_none_or(|grade| assignment.grade == grade)
            && self
                .subject
                .as_deref()
                .is_none_or(|subject| assignment.subject == subject)
            && self
                .teacher_id
                .is_none_or(|teacher| assignment.teacher_id == teacher)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap liveness probe used by the health endpoint.
    async fn ping(&self) -> Result<()>;

    // Accounts
    async fn insert_account(&self, account: &Account) -> Result<InsertOutcome>;
    async fn find_account(&self, role: Role, id: Uuid) -> Result<Option<Account>>;
    async fn find_account_by_phone(&self, role: Role, phone_number: &str)
    -> Result<Option<Account>>;
    async fn update_account(
        &self,
        role: Role,
        id: Uuid,
        update: &AccountUpdate,
    ) -> Result<Option<Account>>;
    async fn set_password_hash(&self, role: Role, id: Uuid, password_hash: &str) -> Result<bool>;
    /// Move a pending account to `decision`; `None` when the account is unknown.
    async fn review_account(
        &self,
        role: Role,
        id: Uuid,
        decision: VerificationStatus,
    ) -> Result<Option<ReviewOutcome>>;
    async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>>;
    async fn list_verified_institutions(&self) -> Result<Vec<String>>;

    // Membership sets; add/remove report whether the set changed.
    async fn add_membership(&self, account_id: Uuid, set: Membership, item: &str) -> Result<bool>;
    async fn remove_membership(&self, account_id: Uuid, set: Membership, item: &str)
    -> Result<bool>;
    async fn memberships(&self, account_id: Uuid, set: Membership) -> Result<Vec<String>>;

    // Session registry
    async fn upsert_session(&self, session: &SessionRecord) -> Result<()>;
    /// Live (unexpired) session for the account.
    async fn find_session(&self, account_id: Uuid) -> Result<Option<SessionRecord>>;
    /// Delete the session only if it still holds `token_hash`.
    async fn delete_session(&self, account_id: Uuid, token_hash: &[u8]) -> Result<bool>;

    // Password reset tickets
    async fn upsert_reset_ticket(&self, ticket: &ResetTicket) -> Result<()>;
    async fn find_reset_ticket(&self, account_id: Uuid) -> Result<Option<ResetTicket>>;
    /// Count a wrong code against the ticket; `None` when there is no ticket.
    async fn record_reset_failure(&self, account_id: Uuid) -> Result<Option<u32>>;
    async fn delete_reset_ticket(&self, account_id: Uuid) -> Result<bool>;

    // Notification ledger
    async fn push_notification(&self, owner_id: Uuid, event: &NotificationEvent) -> Result<()>;
    async fn list_notifications(&self, owner_id: Uuid) -> Result<Vec<Notification>>;
    async fn clear_notification(&self, owner_id: Uuid, notification_id: Uuid) -> Result<bool>;

    // Message threads
    async fn insert_thread(&self, thread: &MessageThread) -> Result<InsertOutcome>;
    async fn find_thread(&self, id: &str) -> Result<Option<MessageThread>>;
    async fn list_threads(&self, filter: &ThreadFilter) -> Result<Vec<MessageThread>>;
    async fn append_reply(&self, thread_id: &str, reply: &Reply) -> Result<bool>;
    /// New size of the `direction` set; `None` when the thread is unknown.
    async fn toggle_vote(
        &self,
        thread_id: &str,
        voter_id: Uuid,
        direction: VoteDirection,
    ) -> Result<Option<usize>>;
    async fn add_report(
        &self,
        thread_id: &str,
        reporter_id: Uuid,
        threshold: usize,
    ) -> Result<ReportOutcome>;

    // Assignments
    async fn insert_assignment(&self, assignment: &Assignment) -> Result<InsertOutcome>;
    async fn find_assignment(&self, id: &str) -> Result<Option<Assignment>>;
    async fn list_assignments(&self, filter: &AssignmentFilter) -> Result<Vec<Assignment>>;
    /// Remove the assignment and drop it from every account's assignment set.
    async fn delete_assignment(&self, id: &str) -> Result<bool>;
    /// Append the submission and register the assignment in the student's set,
    /// unless the student already submitted.
    async fn record_submission(
        &self,
        assignment_id: &str,
        submission: &Submission,
    ) -> Result<SubmissionOutcome>;
}
