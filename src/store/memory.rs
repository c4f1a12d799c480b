//! In-process [`Store`] used by `--dsn memory://` and the test suites.
//!
//! One mutex guards the whole state, so every trait call is a single critical
//! section and the atomicity guarantees match the PostgreSQL backend.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AccountFilter, AssignmentFilter, InsertOutcome, Membership, ReportOutcome, ResetTicket,
    ReviewOutcome, SessionRecord, Store, SubmissionOutcome, ThreadFilter,
};
use crate::domain::{
    Account, AccountUpdate, Assignment, MessageThread, Notification, NotificationEvent, Reply,
    Role, Submission, VerificationStatus, VoteDirection,
};

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    memberships: HashMap<(Uuid, Membership), BTreeSet<String>>,
    sessions: HashMap<Uuid, SessionRecord>,
    reset_tickets: HashMap<Uuid, ResetTicket>,
    notifications: HashMap<Uuid, Vec<Notification>>,
    threads: HashMap<String, MessageThread>,
    assignments: HashMap<String, Assignment>,
}

impl State {
    fn account(&self, role: Role, id: Uuid) -> Option<&Account> {
        self.accounts.get(&id).filter(|account| account.role() == role)
    }

    fn account_mut(&mut self, role: Role, id: Uuid) -> Option<&mut Account> {
        self.accounts
            .get_mut(&id)
            .filter(|account| account.role() == role)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_account(&self, account: &Account) -> Result<InsertOutcome> {
        let mut state = self.state.lock().await;
        let taken = state.accounts.values().any(|existing| {
            existing.id == account.id
                || (existing.role() == account.role()
                    && existing.phone_number == account.phone_number)
        });
        if taken {
            return Ok(InsertOutcome::Conflict);
        }
        state.accounts.insert(account.id, account.clone());
        Ok(InsertOutcome::Created)
    }

    async fn find_account(&self, role: Role, id: Uuid) -> Result<Option<Account>> {
        Ok(self.state.lock().await.account(role, id).cloned())
    }

    async fn find_account_by_phone(
        &self,
        role: Role,
        phone_number: &str,
    ) -> Result<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|account| account.role() == role && account.phone_number == phone_number)
            .cloned())
    }

    async fn update_account(
        &self,
        role: Role,
        id: Uuid,
        update: &AccountUpdate,
    ) -> Result<Option<Account>> {
        let mut state = self.state.lock().await;
        Ok(state.account_mut(role, id).map(|account| {
            update.apply(account);
            account.clone()
        }))
    }

    async fn set_password_hash(&self, role: Role, id: Uuid, password_hash: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state
            .account_mut(role, id)
            .map(|account| account.password_hash = password_hash.to_string())
            .is_some())
    }

    async fn review_account(
        &self,
        role: Role,
        id: Uuid,
        decision: VerificationStatus,
    ) -> Result<Option<ReviewOutcome>> {
        let mut state = self.state.lock().await;
        let Some(account) = state.account_mut(role, id) else {
            return Ok(None);
        };
        let current = account.verification.unwrap_or(VerificationStatus::Pending);
        if current == VerificationStatus::Pending {
            account.verification = Some(decision);
            Ok(Some(ReviewOutcome::Applied))
        } else {
            Ok(Some(ReviewOutcome::Unchanged(current)))
        }
    }

    async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>> {
        let state = self.state.lock().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|account| filter.matches(account))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }

    async fn list_verified_institutions(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let institutions: BTreeSet<String> = state
            .accounts
            .values()
            .filter(|account| {
                account.role() == Role::LocalAdmin
                    && account.verification == Some(VerificationStatus::Verified)
            })
            .filter_map(|account| account.profile.institution().map(str::to_string))
            .collect();
        Ok(institutions.into_iter().collect())
    }

    async fn add_membership(&self, account_id: Uuid, set: Membership, item: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state
            .memberships
            .entry((account_id, set))
            .or_default()
            .insert(item.to_string()))
    }

    async fn remove_membership(
        &self,
        account_id: Uuid,
        set: Membership,
        item: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state
            .memberships
            .get_mut(&(account_id, set))
            .is_some_and(|items| items.remove(item)))
    }

    async fn memberships(&self, account_id: Uuid, set: Membership) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .memberships
            .get(&(account_id, set))
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_session(&self, session: &SessionRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.sessions.insert(session.account_id, session.clone());
        Ok(())
    }

    async fn find_session(&self, account_id: Uuid) -> Result<Option<SessionRecord>> {
        let state = self.state.lock().await;
        let now = Utc::now();
        Ok(state
            .sessions
            .get(&account_id)
            .filter(|session| session.expires_at > now)
            .cloned())
    }

    async fn delete_session(&self, account_id: Uuid, token_hash: &[u8]) -> Result<bool> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let live = state.sessions.get(&account_id).is_some_and(|session| {
            session.expires_at > now && session.token_hash.as_slice() == token_hash
        });
        if live {
            state.sessions.remove(&account_id);
        }
        Ok(live)
    }

    async fn upsert_reset_ticket(&self, ticket: &ResetTicket) -> Result<()> {
        let mut state = self.state.lock().await;
        state.reset_tickets.insert(ticket.account_id, ticket.clone());
        Ok(())
    }

    async fn find_reset_ticket(&self, account_id: Uuid) -> Result<Option<ResetTicket>> {
        let state = self.state.lock().await;
        let now = Utc::now();
        Ok(state
            .reset_tickets
            .get(&account_id)
            .filter(|ticket| ticket.expires_at > now)
            .cloned())
    }

    async fn record_reset_failure(&self, account_id: Uuid) -> Result<Option<u32>> {
        let mut state = self.state.lock().await;
        Ok(state.reset_tickets.get_mut(&account_id).map(|ticket| {
            ticket.failed_attempts = ticket.failed_attempts.saturating_add(1);
            ticket.failed_attempts
        }))
    }

    async fn delete_reset_ticket(&self, account_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.reset_tickets.remove(&account_id).is_some())
    }

    async fn push_notification(&self, owner_id: Uuid, event: &NotificationEvent) -> Result<()> {
        let mut state = self.state.lock().await;
        let ledger = state.notifications.entry(owner_id).or_default();
        match ledger
            .iter_mut()
            .find(|notification| notification.actor_id == event.actor_id)
        {
            Some(existing) => existing.coalesce(event),
            None => ledger.push(Notification::from_event(event)),
        }
        Ok(())
    }

    async fn list_notifications(&self, owner_id: Uuid) -> Result<Vec<Notification>> {
        let state = self.state.lock().await;
        let mut ledger = state
            .notifications
            .get(&owner_id)
            .cloned()
            .unwrap_or_default();
        ledger.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(ledger)
    }

    async fn clear_notification(&self, owner_id: Uuid, notification_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(ledger) = state.notifications.get_mut(&owner_id) else {
            return Ok(false);
        };
        let before = ledger.len();
        ledger.retain(|notification| notification.id != notification_id);
        Ok(ledger.len() != before)
    }

    async fn insert_thread(&self, thread: &MessageThread) -> Result<InsertOutcome> {
        let mut state = self.state.lock().await;
        if state.threads.contains_key(&thread.id) {
            return Ok(InsertOutcome::Conflict);
        }
        state.threads.insert(thread.id.clone(), thread.clone());
        Ok(InsertOutcome::Created)
    }

    async fn find_thread(&self, id: &str) -> Result<Option<MessageThread>> {
        Ok(self.state.lock().await.threads.get(id).cloned())
    }

    async fn list_threads(&self, filter: &ThreadFilter) -> Result<Vec<MessageThread>> {
        let state = self.state.lock().await;
        let mut threads: Vec<MessageThread> = state
            .threads
            .values()
            .filter(|thread| filter.matches(thread))
            .cloned()
            .collect();
        threads.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(threads)
    }

    async fn append_reply(&self, thread_id: &str, reply: &Reply) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state
            .threads
            .get_mut(thread_id)
            .map(|thread| thread.replies.push(reply.clone()))
            .is_some())
    }

    async fn toggle_vote(
        &self,
        thread_id: &str,
        voter_id: Uuid,
        direction: VoteDirection,
    ) -> Result<Option<usize>> {
        let mut state = self.state.lock().await;
        Ok(state
            .threads
            .get_mut(thread_id)
            .map(|thread| thread.toggle_vote(voter_id, direction)))
    }

    async fn add_report(
        &self,
        thread_id: &str,
        reporter_id: Uuid,
        threshold: usize,
    ) -> Result<ReportOutcome> {
        let mut state = self.state.lock().await;
        let Some(thread) = state.threads.get_mut(thread_id) else {
            return Ok(ReportOutcome::Missing);
        };
        if !thread.add_reporter(reporter_id) {
            return Ok(ReportOutcome::Duplicate);
        }
        let reports = thread.reporters.len();
        if reports < threshold {
            return Ok(ReportOutcome::Recorded { reports });
        }
        match state.threads.remove(thread_id) {
            Some(thread) => Ok(ReportOutcome::Removed(Box::new(thread))),
            None => Ok(ReportOutcome::Missing),
        }
    }

    async fn insert_assignment(&self, assignment: &Assignment) -> Result<InsertOutcome> {
        let mut state = self.state.lock().await;
        if state.assignments.contains_key(&assignment.id) {
            return Ok(InsertOutcome::Conflict);
        }
        state
            .assignments
            .insert(assignment.id.clone(), assignment.clone());
        Ok(InsertOutcome::Created)
    }

    async fn find_assignment(&self, id: &str) -> Result<Option<Assignment>> {
        Ok(self.state.lock().await.assignments.get(id).cloned())
    }

    async fn list_assignments(&self, filter: &AssignmentFilter) -> Result<Vec<Assignment>> {
        let state = self.state.lock().await;
        let mut assignments: Vec<Assignment> = state
            .assignments
            .values()
            .filter(|assignment| filter.matches(assignment))
            .cloned()
            .collect();
        assignments.sort_by(|a, b| b.publish_date.cmp(&a.publish_date).then(a.id.cmp(&b.id)));
        Ok(assignments)
    }

    async fn delete_assignment(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.assignments.remove(id).is_none() {
            return Ok(false);
        }
        for ((_, set), items) in &mut state.memberships {
            if *set == Membership::Assignments {
                items.remove(id);
            }
        }
        Ok(true)
    }

    async fn record_submission(
        &self,
        assignment_id: &str,
        submission: &Submission,
    ) -> Result<SubmissionOutcome> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(assignment) = state.assignments.get_mut(assignment_id) else {
            return Ok(SubmissionOutcome::Missing);
        };
        let submitted = state
            .memberships
            .entry((submission.student_id, Membership::Assignments))
            .or_default();
        if submitted.contains(assignment_id)
            || assignment.submission_of(submission.student_id).is_some()
        {
            return Ok(SubmissionOutcome::AlreadySubmitted);
        }
        submitted.insert(assignment_id.to_string());
        assignment.submissions.push(submission.clone());
        Ok(SubmissionOutcome::Recorded)
    }
}
