//! PostgreSQL [`Store`] backed by `sqlx`.
//!
//! Every statement runs inside a `db.query` span. Read-modify-write operations
//! lock the parent row (`FOR UPDATE`) or lean on `ON CONFLICT` so concurrent
//! requests against the same thread, assignment or ledger cannot interleave.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::{
    Connection, PgPool, Postgres, Row, Transaction,
    postgres::{PgPoolOptions, PgRow},
    types::Json,
};
use std::{collections::HashMap, time::Duration};
use tracing::{Instrument, Span, info_span};
use uuid::Uuid;

use super::{
    AccountFilter, AssignmentFilter, InsertOutcome, Membership, ReportOutcome, ResetTicket,
    ReviewOutcome, SessionRecord, Store, SubmissionOutcome, ThreadFilter,
};
use crate::domain::{
    Account, AccountUpdate, Assignment, MessageThread, Notification, NotificationEvent, Profile,
    Question, Reply, Role, Submission, VerificationStatus, VoteDirection,
};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

fn db_span(operation: &'static str, statement: &'static str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Split the bundled schema into individual statements.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a small pool to `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema; every statement is idempotent.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn apply_schema(&self) -> Result<()> {
        for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
            sqlx::query(statement)
                .execute(&self.pool)
                .instrument(db_span("DDL", "schema.sql"))
                .await
                .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
        }
        Ok(())
    }

    async fn hydrate_threads(&self, rows: Vec<PgRow>) -> Result<Vec<MessageThread>> {
        let mut threads = rows
            .iter()
            .map(thread_from_row)
            .collect::<Result<Vec<_>>>()?;
        if threads.is_empty() {
            return Ok(threads);
        }

        let ids: Vec<String> = threads.iter().map(|thread| thread.id.clone()).collect();
        let index: HashMap<String, usize> = ids
            .iter()
            .enumerate()
            .map(|(position, id)| (id.clone(), position))
            .collect();

        let query = r"
            SELECT id, thread_id, sender_id, sender_kind, sender_name, sender_gender, body,
                   image_key, created_at
            FROM message_replies
            WHERE thread_id = ANY($1)
            ORDER BY created_at, id
        ";
        let replies = sqlx::query(query)
            .bind(&ids)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load replies")?;
        for row in &replies {
            let thread_id: String = row.try_get("thread_id")?;
            if let Some(thread) = index.get(&thread_id).and_then(|&i| threads.get_mut(i)) {
                thread.replies.push(reply_from_row(row)?);
            }
        }

        let query = r"
            SELECT thread_id, voter_id, direction
            FROM message_votes
            WHERE thread_id = ANY($1)
        ";
        let votes = sqlx::query(query)
            .bind(&ids)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load votes")?;
        for row in &votes {
            let thread_id: String = row.try_get("thread_id")?;
            let voter: Uuid = row.try_get("voter_id")?;
            let direction: String = row.try_get("direction")?;
            if let Some(thread) = index.get(&thread_id).and_then(|&i| threads.get_mut(i)) {
                if direction == VoteDirection::Up.as_str() {
                    thread.upvoters.push(voter);
                } else {
                    thread.downvoters.push(voter);
                }
            }
        }

        let query = r"
            SELECT thread_id, reporter_id
            FROM message_reports
            WHERE thread_id = ANY($1)
            ORDER BY reported_at
        ";
        let reports = sqlx::query(query)
            .bind(&ids)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load reports")?;
        for row in &reports {
            let thread_id: String = row.try_get("thread_id")?;
            let reporter: Uuid = row.try_get("reporter_id")?;
            if let Some(thread) = index.get(&thread_id).and_then(|&i| threads.get_mut(i)) {
                thread.reporters.push(reporter);
            }
        }

        Ok(threads)
    }

    async fn hydrate_assignments(&self, rows: Vec<PgRow>) -> Result<Vec<Assignment>> {
        let mut assignments = rows
            .iter()
            .map(assignment_from_row)
            .collect::<Result<Vec<_>>>()?;
        if assignments.is_empty() {
            return Ok(assignments);
        }

        let ids: Vec<String> = assignments.iter().map(|a| a.id.clone()).collect();
        let index: HashMap<String, usize> = ids
            .iter()
            .enumerate()
            .map(|(position, id)| (id.clone(), position))
            .collect();

        let query = r"
            SELECT assignment_id, student_id, student_name, answers, points, submitted_at
            FROM assignment_submissions
            WHERE assignment_id = ANY($1)
            ORDER BY submitted_at
        ";
        let rows = sqlx::query(query)
            .bind(&ids)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load submissions")?;
        for row in &rows {
            let assignment_id: String = row.try_get("assignment_id")?;
            let Json(answers): Json<Vec<Option<Vec<String>>>> = row.try_get("answers")?;
            let submission = Submission {
                student_id: row.try_get("student_id")?,
                student_name: row.try_get("student_name")?,
                answers,
                points: row.try_get("points")?,
                submitted_at: row.try_get("submitted_at")?,
            };
            if let Some(assignment) = index
                .get(&assignment_id)
                .and_then(|&i| assignments.get_mut(i))
            {
                assignment.submissions.push(submission);
            }
        }

        Ok(assignments)
    }
}

fn parse_column<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse::<T>().map_err(|err| anyhow!(err))
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let verification: Option<String> = row.try_get("verification_status")?;
    let Json(profile): Json<Profile> = row.try_get("profile")?;
    Ok(Account {
        id: row.try_get("id")?,
        phone_number: row.try_get("phone_number")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        age: row.try_get("age")?,
        gender: row.try_get("gender")?,
        password_hash: row.try_get("password_hash")?,
        verification: verification
            .as_deref()
            .map(parse_column::<VerificationStatus>)
            .transpose()?,
        profile,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<SessionRecord> {
    let role: String = row.try_get("role")?;
    Ok(SessionRecord {
        account_id: row.try_get("account_id")?,
        role: parse_column(&role)?,
        token_hash: row.try_get("token_hash")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification> {
    Ok(Notification {
        id: row.try_get("id")?,
        actor_id: row.try_get("actor_id")?,
        actor_name: row.try_get("actor_name")?,
        category: row.try_get("category")?,
        created_at: row.try_get("created_at")?,
        count: row.try_get("count")?,
    })
}

fn thread_from_row(row: &PgRow) -> Result<MessageThread> {
    Ok(MessageThread {
        id: row.try_get("id")?,
        author_id: row.try_get("author_id")?,
        author_name: row.try_get("author_name")?,
        author_gender: row.try_get("author_gender")?,
        body: row.try_get("body")?,
        image_key: row.try_get("image_key")?,
        tags: row.try_get("tags")?,
        school: row.try_get("school")?,
        created_at: row.try_get("created_at")?,
        replies: Vec::new(),
        upvoters: Vec::new(),
        downvoters: Vec::new(),
        reporters: Vec::new(),
    })
}

fn reply_from_row(row: &PgRow) -> Result<Reply> {
    let kind: String = row.try_get("sender_kind")?;
    Ok(Reply {
        id: row.try_get("id")?,
        sender_id: row.try_get("sender_id")?,
        sender_kind: parse_column(&kind)?,
        sender_name: row.try_get("sender_name")?,
        sender_gender: row.try_get("sender_gender")?,
        body: row.try_get("body")?,
        image_key: row.try_get("image_key")?,
        created_at: row.try_get("created_at")?,
    })
}

fn assignment_from_row(row: &PgRow) -> Result<Assignment> {
    let Json(questions): Json<Vec<Question>> = row.try_get("questions")?;
    Ok(Assignment {
        id: row.try_get("id")?,
        teacher_id: row.try_get("teacher_id")?,
        title: row.try_get("title")?,
        questions,
        publish_date: row.try_get("publish_date")?,
        deadline: row.try_get("deadline")?,
        school: row.try_get("school")?,
        grade: row.try_get("grade")?,
        subject: row.try_get("subject")?,
        submissions: Vec::new(),
    })
}

fn count_to_usize(count: i64) -> Result<usize> {
    usize::try_from(count).context("negative row count")
}

async fn lock_row(
    tx: &mut Transaction<'_, Postgres>,
    query: &'static str,
    id: &str,
) -> Result<bool> {
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(&mut **tx)
        .instrument(db_span("SELECT", query))
        .await
        .context("failed to lock row")?;
    Ok(row.is_some())
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }

    async fn insert_account(&self, account: &Account) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO accounts
                (id, role, phone_number, name, email, age, gender, password_hash,
                 verification_status, institution, grade, profile, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ";
        let result = sqlx::query(query)
            .bind(account.id)
            .bind(account.role().as_str())
            .bind(&account.phone_number)
            .bind(&account.name)
            .bind(&account.email)
            .bind(account.age)
            .bind(&account.gender)
            .bind(&account.password_hash)
            .bind(account.verification.map(VerificationStatus::as_str))
            .bind(account.profile.institution())
            .bind(account.profile.grade())
            .bind(Json(&account.profile))
            .bind(account.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert account"),
        }
    }

    async fn find_account(&self, role: Role, id: Uuid) -> Result<Option<Account>> {
        let query = r"
            SELECT id, phone_number, name, email, age, gender, password_hash,
                   verification_status, profile, created_at
            FROM accounts
            WHERE id = $1 AND role = $2
        ";
        let row = sqlx::query(query)
            .bind(id)
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to find account")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_account_by_phone(
        &self,
        role: Role,
        phone_number: &str,
    ) -> Result<Option<Account>> {
        let query = r"
            SELECT id, phone_number, name, email, age, gender, password_hash,
                   verification_status, profile, created_at
            FROM accounts
            WHERE role = $1 AND phone_number = $2
        ";
        let row = sqlx::query(query)
            .bind(role.as_str())
            .bind(phone_number)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to find account by phone")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn update_account(
        &self,
        role: Role,
        id: Uuid,
        update: &AccountUpdate,
    ) -> Result<Option<Account>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin account update transaction")?;

        let query = r"
            SELECT id, phone_number, name, email, age, gender, password_hash,
                   verification_status, profile, created_at
            FROM accounts
            WHERE id = $1 AND role = $2
            FOR UPDATE
        ";
        let row = sqlx::query(query)
            .bind(id)
            .bind(role.as_str())
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lock account")?;
        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Ok(None);
        };
        let mut account = account_from_row(&row)?;
        update.apply(&mut account);

        let query = r"
            UPDATE accounts
            SET name = $1, age = $2, gender = $3, institution = $4, grade = $5,
                profile = $6, updated_at = NOW()
            WHERE id = $7
        ";
        sqlx::query(query)
            .bind(&account.name)
            .bind(account.age)
            .bind(&account.gender)
            .bind(account.profile.institution())
            .bind(account.profile.grade())
            .bind(Json(&account.profile))
            .bind(id)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update account")?;

        tx.commit().await.context("commit account update")?;
        Ok(Some(account))
    }

    async fn set_password_hash(&self, role: Role, id: Uuid, password_hash: &str) -> Result<bool> {
        let query = r"
            UPDATE accounts
            SET password_hash = $1, updated_at = NOW()
            WHERE id = $2 AND role = $3
        ";
        let result = sqlx::query(query)
            .bind(password_hash)
            .bind(id)
            .bind(role.as_str())
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update password hash")?;
        Ok(result.rows_affected() > 0)
    }

    async fn review_account(
        &self,
        role: Role,
        id: Uuid,
        decision: VerificationStatus,
    ) -> Result<Option<ReviewOutcome>> {
        let query = r"
            UPDATE accounts
            SET verification_status = $1, updated_at = NOW()
            WHERE id = $2 AND role = $3
              AND COALESCE(verification_status, 'pending') = 'pending'
        ";
        let result = sqlx::query(query)
            .bind(decision.as_str())
            .bind(id)
            .bind(role.as_str())
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to review account")?;
        if result.rows_affected() > 0 {
            return Ok(Some(ReviewOutcome::Applied));
        }

        let query = r"
            SELECT COALESCE(verification_status, 'pending') AS verification_status
            FROM accounts
            WHERE id = $1 AND role = $2
        ";
        let row = sqlx::query(query)
            .bind(id)
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read verification status")?;
        match row {
            Some(row) => {
                let status: String = row.try_get("verification_status")?;
                Ok(Some(ReviewOutcome::Unchanged(parse_column(&status)?)))
            }
            None => Ok(None),
        }
    }

    async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>> {
        let query = r"
            SELECT id, phone_number, name, email, age, gender, password_hash,
                   verification_status, profile, created_at
            FROM accounts
            WHERE role = $1
              AND ($2::text IS NULL OR institution = $2)
              AND ($3::text IS NULL OR grade = $3)
            ORDER BY name, id
        ";
        let rows = sqlx::query(query)
            .bind(filter.role.as_str())
            .bind(&filter.institution)
            .bind(&filter.grade)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list accounts")?;
        rows.iter().map(account_from_row).collect()
    }

    async fn list_verified_institutions(&self) -> Result<Vec<String>> {
        let query = r"
            SELECT DISTINCT institution
            FROM accounts
            WHERE role = 'localAdmin'
              AND verification_status = 'verified'
              AND institution IS NOT NULL
            ORDER BY institution
        ";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list institutions")?;
        rows.iter()
            .map(|row| row.try_get("institution").map_err(anyhow::Error::from))
            .collect()
    }

    async fn add_membership(&self, account_id: Uuid, set: Membership, item: &str) -> Result<bool> {
        let query = r"
            INSERT INTO account_memberships (account_id, kind, item_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
        ";
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(set.as_str())
            .bind(item)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to add membership")?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_membership(
        &self,
        account_id: Uuid,
        set: Membership,
        item: &str,
    ) -> Result<bool> {
        let query =
            "DELETE FROM account_memberships WHERE account_id = $1 AND kind = $2 AND item_id = $3";
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(set.as_str())
            .bind(item)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to remove membership")?;
        Ok(result.rows_affected() > 0)
    }

    async fn memberships(&self, account_id: Uuid, set: Membership) -> Result<Vec<String>> {
        let query = r"
            SELECT item_id
            FROM account_memberships
            WHERE account_id = $1 AND kind = $2
            ORDER BY added_at, item_id
        ";
        let rows = sqlx::query(query)
            .bind(account_id)
            .bind(set.as_str())
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list memberships")?;
        rows.iter()
            .map(|row| row.try_get("item_id").map_err(anyhow::Error::from))
            .collect()
    }

    async fn upsert_session(&self, session: &SessionRecord) -> Result<()> {
        let query = r"
            INSERT INTO sessions (account_id, role, token_hash, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id) DO UPDATE
            SET role = EXCLUDED.role,
                token_hash = EXCLUDED.token_hash,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
        ";
        sqlx::query(query)
            .bind(session.account_id)
            .bind(session.role.as_str())
            .bind(&session.token_hash)
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to upsert session")?;
        Ok(())
    }

    async fn find_session(&self, account_id: Uuid) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT account_id, role, token_hash, created_at, expires_at
            FROM sessions
            WHERE account_id = $1 AND expires_at > NOW()
        ";
        let row = sqlx::query(query)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to find session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn delete_session(&self, account_id: Uuid, token_hash: &[u8]) -> Result<bool> {
        let query = r"
            DELETE FROM sessions
            WHERE account_id = $1 AND token_hash = $2 AND expires_at > NOW()
        ";
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_reset_ticket(&self, ticket: &ResetTicket) -> Result<()> {
        let query = r"
            INSERT INTO password_reset_tickets
                (account_id, role, email, otp_hash, failed_attempts, created_at, expires_at)
            VALUES ($1, $2, $3, $4, 0, $5, $6)
            ON CONFLICT (account_id) DO UPDATE
            SET role = EXCLUDED.role,
                email = EXCLUDED.email,
                otp_hash = EXCLUDED.otp_hash,
                failed_attempts = 0,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
        ";
        sqlx::query(query)
            .bind(ticket.account_id)
            .bind(ticket.role.as_str())
            .bind(&ticket.email)
            .bind(&ticket.otp_hash)
            .bind(ticket.created_at)
            .bind(ticket.expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to upsert reset ticket")?;
        Ok(())
    }

    async fn find_reset_ticket(&self, account_id: Uuid) -> Result<Option<ResetTicket>> {
        let query = r"
            SELECT account_id, role, email, otp_hash, failed_attempts, created_at, expires_at
            FROM password_reset_tickets
            WHERE account_id = $1 AND expires_at > NOW()
        ";
        let row = sqlx::query(query)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to find reset ticket")?;
        let Some(row) = row else {
            return Ok(None);
        };
        let role: String = row.try_get("role")?;
        let failed_attempts: i32 = row.try_get("failed_attempts")?;
        Ok(Some(ResetTicket {
            account_id: row.try_get("account_id")?,
            role: parse_column(&role)?,
            email: row.try_get("email")?,
            otp_hash: row.try_get("otp_hash")?,
            failed_attempts: u32::try_from(failed_attempts).context("negative attempt count")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        }))
    }

    async fn record_reset_failure(&self, account_id: Uuid) -> Result<Option<u32>> {
        let query = r"
            UPDATE password_reset_tickets
            SET failed_attempts = failed_attempts + 1
            WHERE account_id = $1
            RETURNING failed_attempts
        ";
        let count: Option<i32> = sqlx::query_scalar(query)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to count reset failure")?;
        count
            .map(|count| u32::try_from(count).context("negative attempt count"))
            .transpose()
    }

    async fn delete_reset_ticket(&self, account_id: Uuid) -> Result<bool> {
        let query = "DELETE FROM password_reset_tickets WHERE account_id = $1";
        let result = sqlx::query(query)
            .bind(account_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete reset ticket")?;
        Ok(result.rows_affected() > 0)
    }

    async fn push_notification(&self, owner_id: Uuid, event: &NotificationEvent) -> Result<()> {
        let query = r"
            INSERT INTO notifications (id, owner_id, actor_id, actor_name, category, count, created_at)
            VALUES ($1, $2, $3, $4, $5, 1, NOW())
            ON CONFLICT (owner_id, actor_id) DO UPDATE
            SET count = notifications.count + 1,
                actor_name = EXCLUDED.actor_name,
                category = EXCLUDED.category,
                created_at = NOW()
        ";
        sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(owner_id)
            .bind(&event.actor_id)
            .bind(&event.actor_name)
            .bind(&event.category)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to push notification")?;
        Ok(())
    }

    async fn list_notifications(&self, owner_id: Uuid) -> Result<Vec<Notification>> {
        let query = r"
            SELECT id, actor_id, actor_name, category, created_at, count
            FROM notifications
            WHERE owner_id = $1
            ORDER BY created_at DESC
        ";
        let rows = sqlx::query(query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list notifications")?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn clear_notification(&self, owner_id: Uuid, notification_id: Uuid) -> Result<bool> {
        let query = "DELETE FROM notifications WHERE id = $1 AND owner_id = $2";
        let result = sqlx::query(query)
            .bind(notification_id)
            .bind(owner_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to clear notification")?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_thread(&self, thread: &MessageThread) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO message_threads
                (id, author_id, author_name, author_gender, body, image_key, tags, school, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        let result = sqlx::query(query)
            .bind(&thread.id)
            .bind(thread.author_id)
            .bind(&thread.author_name)
            .bind(&thread.author_gender)
            .bind(&thread.body)
            .bind(&thread.image_key)
            .bind(&thread.tags)
            .bind(&thread.school)
            .bind(thread.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert message thread"),
        }
    }

    async fn find_thread(&self, id: &str) -> Result<Option<MessageThread>> {
        let query = r"
            SELECT id, author_id, author_name, author_gender, body, image_key, tags, school,
                   created_at
            FROM message_threads
            WHERE id = $1
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to find message thread")?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.hydrate_threads(vec![row]).await?.into_iter().next())
    }

    async fn list_threads(&self, filter: &ThreadFilter) -> Result<Vec<MessageThread>> {
        let query = r"
            SELECT id, author_id, author_name, author_gender, body, image_key, tags, school,
                   created_at
            FROM message_threads
            WHERE ($1::text IS NULL OR school = $1)
              AND ($2::uuid IS NULL OR author_id = $2)
            ORDER BY created_at DESC, id
        ";
        let rows = sqlx::query(query)
            .bind(&filter.school)
            .bind(filter.author_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list message threads")?;
        self.hydrate_threads(rows).await
    }

    async fn append_reply(&self, thread_id: &str, reply: &Reply) -> Result<bool> {
        let query = r"
            INSERT INTO message_replies
                (id, thread_id, sender_id, sender_kind, sender_name, sender_gender, body,
                 image_key, created_at)
            SELECT $1, t.id, $3, $4, $5, $6, $7, $8, $9
            FROM message_threads t
            WHERE t.id = $2
        ";
        let result = sqlx::query(query)
            .bind(reply.id)
            .bind(thread_id)
            .bind(reply.sender_id)
            .bind(reply.sender_kind.as_str())
            .bind(&reply.sender_name)
            .bind(&reply.sender_gender)
            .bind(&reply.body)
            .bind(&reply.image_key)
            .bind(reply.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to append reply")?;
        Ok(result.rows_affected() > 0)
    }

    async fn toggle_vote(
        &self,
        thread_id: &str,
        voter_id: Uuid,
        direction: VoteDirection,
    ) -> Result<Option<usize>> {
        let mut tx = self.pool.begin().await.context("begin vote transaction")?;

        if !lock_row(
            &mut tx,
            "SELECT id FROM message_threads WHERE id = $1 FOR UPDATE",
            thread_id,
        )
        .await?
        {
            let _ = tx.rollback().await;
            return Ok(None);
        }

        let query = "SELECT direction FROM message_votes WHERE thread_id = $1 AND voter_id = $2";
        let current: Option<String> = sqlx::query(query)
            .bind(thread_id)
            .bind(voter_id)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read vote")?
            .map(|row| row.try_get("direction"))
            .transpose()?;

        if current.as_deref() == Some(direction.as_str()) {
            let query = "DELETE FROM message_votes WHERE thread_id = $1 AND voter_id = $2";
            sqlx::query(query)
                .bind(thread_id)
                .bind(voter_id)
                .execute(&mut *tx)
                .instrument(db_span("DELETE", query))
                .await
                .context("failed to remove vote")?;
        } else {
            let query = r"
                INSERT INTO message_votes (thread_id, voter_id, direction)
                VALUES ($1, $2, $3)
                ON CONFLICT (thread_id, voter_id) DO UPDATE SET direction = EXCLUDED.direction
            ";
            sqlx::query(query)
                .bind(thread_id)
                .bind(voter_id)
                .bind(direction.as_str())
                .execute(&mut *tx)
                .instrument(db_span("INSERT", query))
                .await
                .context("failed to cast vote")?;
        }

        let query =
            "SELECT COUNT(*) AS total FROM message_votes WHERE thread_id = $1 AND direction = $2";
        let total: i64 = sqlx::query(query)
            .bind(thread_id)
            .bind(direction.as_str())
            .fetch_one(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to count votes")?
            .try_get("total")?;

        tx.commit().await.context("commit vote transaction")?;
        count_to_usize(total).map(Some)
    }

    async fn add_report(
        &self,
        thread_id: &str,
        reporter_id: Uuid,
        threshold: usize,
    ) -> Result<ReportOutcome> {
        let mut tx = self.pool.begin().await.context("begin report transaction")?;

        if !lock_row(
            &mut tx,
            "SELECT id FROM message_threads WHERE id = $1 FOR UPDATE",
            thread_id,
        )
        .await?
        {
            let _ = tx.rollback().await;
            return Ok(ReportOutcome::Missing);
        }

        let query = r"
            INSERT INTO message_reports (thread_id, reporter_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
        ";
        let inserted = sqlx::query(query)
            .bind(thread_id)
            .bind(reporter_id)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to record report")?
            .rows_affected();
        if inserted == 0 {
            let _ = tx.rollback().await;
            return Ok(ReportOutcome::Duplicate);
        }

        let query = "SELECT COUNT(*) AS total FROM message_reports WHERE thread_id = $1";
        let total: i64 = sqlx::query(query)
            .bind(thread_id)
            .fetch_one(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to count reports")?
            .try_get("total")?;
        let reports = count_to_usize(total)?;

        if reports < threshold {
            tx.commit().await.context("commit report transaction")?;
            return Ok(ReportOutcome::Recorded { reports });
        }

        // Replies, votes and reports go with the thread through ON DELETE CASCADE.
        let query = r"
            DELETE FROM message_threads
            WHERE id = $1
            RETURNING id, author_id, author_name, author_gender, body, image_key, tags, school,
                      created_at
        ";
        let row = sqlx::query(query)
            .bind(thread_id)
            .fetch_one(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete reported thread")?;
        let thread = thread_from_row(&row)?;

        tx.commit().await.context("commit report transaction")?;
        Ok(ReportOutcome::Removed(Box::new(thread)))
    }

    async fn insert_assignment(&self, assignment: &Assignment) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO assignments
                (id, teacher_id, title, questions, publish_date, deadline, school, grade, subject)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        let result = sqlx::query(query)
            .bind(&assignment.id)
            .bind(assignment.teacher_id)
            .bind(&assignment.title)
            .bind(Json(&assignment.questions))
            .bind(assignment.publish_date)
            .bind(&assignment.deadline)
            .bind(&assignment.school)
            .bind(&assignment.grade)
            .bind(&assignment.subject)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert assignment"),
        }
    }

    async fn find_assignment(&self, id: &str) -> Result<Option<Assignment>> {
        let query = r"
            SELECT id, teacher_id, title, questions, publish_date, deadline, school, grade, subject
            FROM assignments
            WHERE id = $1
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to find assignment")?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.hydrate_assignments(vec![row]).await?.into_iter().next())
    }

    async fn list_assignments(&self, filter: &AssignmentFilter) -> Result<Vec<Assignment>> {
        let query = r"
            SELECT id, teacher_id, title, questions, publish_date, deadline, school, grade, subject
            FROM assignments
            WHERE ($1::text IS NULL OR school = $1)
              AND ($2::text IS NULL OR grade = $2)
              AND ($3::text IS NULL OR subject = $3)
              AND ($4::uuid IS NULL OR teacher_id = $4)
            ORDER BY publish_date DESC, id
        ";
        let rows = sqlx::query(query)
            .bind(&filter.school)
            .bind(&filter.grade)
            .bind(&filter.subject)
            .bind(filter.teacher_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list assignments")?;
        self.hydrate_assignments(rows).await
    }

    async fn delete_assignment(&self, id: &str) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin assignment delete")?;

        let query = "DELETE FROM assignments WHERE id = $1";
        let deleted = sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete assignment")?
            .rows_affected();
        if deleted == 0 {
            let _ = tx.rollback().await;
            return Ok(false);
        }

        let query = r"
            DELETE FROM account_memberships
            WHERE kind = 'assignments' AND item_id = $1
        ";
        sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to unlink assignment")?;

        tx.commit().await.context("commit assignment delete")?;
        Ok(true)
    }

    async fn record_submission(
        &self,
        assignment_id: &str,
        submission: &Submission,
    ) -> Result<SubmissionOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin submission transaction")?;

        if !lock_row(
            &mut tx,
            "SELECT id FROM assignments WHERE id = $1 FOR UPDATE",
            assignment_id,
        )
        .await?
        {
            let _ = tx.rollback().await;
            return Ok(SubmissionOutcome::Missing);
        }

        let query = r"
            INSERT INTO account_memberships (account_id, kind, item_id)
            VALUES ($1, 'assignments', $2)
            ON CONFLICT DO NOTHING
        ";
        let registered = sqlx::query(query)
            .bind(submission.student_id)
            .bind(assignment_id)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to register submission")?
            .rows_affected();
        if registered == 0 {
            let _ = tx.rollback().await;
            return Ok(SubmissionOutcome::AlreadySubmitted);
        }

        let query = r"
            INSERT INTO assignment_submissions
                (assignment_id, student_id, student_name, answers, points, submitted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
        ";
        let appended = sqlx::query(query)
            .bind(assignment_id)
            .bind(submission.student_id)
            .bind(&submission.student_name)
            .bind(Json(&submission.answers))
            .bind(&submission.points)
            .bind(submission.submitted_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to append submission")?
            .rows_affected();
        if appended == 0 {
            let _ = tx.rollback().await;
            return Ok(SubmissionOutcome::AlreadySubmitted);
        }

        tx.commit().await.context("commit submission transaction")?;
        Ok(SubmissionOutcome::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_splits_into_statements() {
        let statements = split_sql_statements(SCHEMA_SQL);
        assert!(statements.len() > 10);
        assert!(statements.iter().all(|statement| statement.ends_with(';')));
        assert!(
            statements
                .iter()
                .any(|statement| statement.starts_with("CREATE TABLE IF NOT EXISTS sessions"))
        );
    }

    #[test]
    fn split_keeps_trailing_statement_without_semicolon() {
        let statements = split_sql_statements("SELECT 1;\n-- note\nSELECT 2");
        assert_eq!(statements, vec!["SELECT 1;".to_string(), "SELECT 2".to_string()]);
    }

    #[tokio::test]
    async fn lazy_pool_builds_without_connecting() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/eduresolve")?;
        let store = PgStore::new(pool);
        assert!(format!("{store:?}").contains("PgStore"));
        Ok(())
    }
}
