//! Assignments, submissions and grading.
//!
//! Teachers publish assignments to a school and grade; every student enrolled
//! there is notified. Students submit once; the submission is graded on the
//! spot and the teacher is notified.

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{
    auth::{Principal, require_auth},
    load_account, parse_account_id, required,
};
use crate::{
    api::{
        error::{ApiError, MessageResponse, acknowledge, require_payload},
        state::AppState,
    },
    domain::{
        Account, Assignment, NotificationEvent, Question, Role, Submission, composite_owner, grade,
    },
    store::{AccountFilter, AssignmentFilter, InsertOutcome, Membership, SubmissionOutcome},
};

const ASSIGNMENT_NOT_FOUND: &str = "Assignment Not Found";

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PostAssignmentRequest {
    pub title: String,
    pub questions: Vec<Question>,
    /// Free text shown to students.
    pub deadline: String,
    pub grade: String,
    pub subject: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct SubmitRequest {
    /// One entry per question; `null` leaves the question unanswered.
    pub answers: Vec<Option<Vec<String>>>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct SubmitResponse {
    pub marks: String,
}

/// Question as shown to students, without the correct answers.
#[derive(ToSchema, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub text: String,
    pub options: Vec<String>,
    pub marks: u32,
}

#[derive(ToSchema, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StudentAssignmentView {
    pub id: String,
    pub teacher_id: Uuid,
    pub title: String,
    pub questions: Vec<QuestionView>,
    pub publish_date: DateTime<Utc>,
    pub deadline: String,
    pub school: String,
    pub grade: String,
    pub subject: String,
    pub submitted: bool,
}

#[derive(ToSchema, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSummary {
    pub id: String,
    pub title: String,
    pub publish_date: DateTime<Utc>,
    pub deadline: String,
    pub subject: String,
    pub grade: String,
    pub school: String,
}

impl From<&Assignment> for AssignmentSummary {
    fn from(assignment: &Assignment) -> Self {
        Self {
            id: assignment.id.clone(),
            title: assignment.title.clone(),
            publish_date: assignment.publish_date,
            deadline: assignment.deadline.clone(),
            subject: assignment.subject.clone(),
            grade: assignment.grade.clone(),
            school: assignment.school.clone(),
        }
    }
}

#[derive(ToSchema, Serialize, Debug, PartialEq, Eq)]
pub struct OwnSubmissionView {
    pub answers: Vec<Option<Vec<String>>>,
    pub marks: String,
    pub questions: Vec<Question>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct SubmittedEntry {
    pub id: Uuid,
    pub name: String,
    pub marks: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct UnsubmittedEntry {
    pub id: Uuid,
    pub name: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct SubmissionsReport {
    pub submitted: Vec<SubmittedEntry>,
    pub unsubmitted: Vec<UnsubmittedEntry>,
}

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AssignmentQuery {
    pub school: Option<String>,
    pub grade: Option<String>,
    pub subject: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn validate_questions(questions: Vec<Question>) -> Result<Vec<Question>, ApiError> {
    if questions.is_empty() {
        return Err(ApiError::validation("At least one question is required"));
    }
    questions
        .into_iter()
        .enumerate()
        .map(|(index, mut question)| {
            let number = index + 1;
            question.text = required(Some(&question.text), &format!("questions[{number}].text"))?;
            if question.marks == 0 {
                return Err(ApiError::validation(format!(
                    "Question {number} must carry positive marks"
                )));
            }
            question.answers.retain(|answer| !answer.trim().is_empty());
            if question.answers.is_empty() {
                return Err(ApiError::validation(format!(
                    "Question {number} needs a correct answer"
                )));
            }
            Ok(question)
        })
        .collect()
}

/// Students enrolled in the school and grade an assignment targets.
async fn enrolled_students(
    state: &AppState,
    assignment: &Assignment,
) -> Result<Vec<Account>, ApiError> {
    let filter = AccountFilter::role(Role::Student)
        .with_institution(assignment.school.clone())
        .with_grade(Some(assignment.grade.clone()));
    Ok(state.store().list_accounts(&filter).await?)
}

async fn find(state: &AppState, id: &str) -> Result<Assignment, ApiError> {
    state
        .store()
        .find_assignment(id)
        .await?
        .ok_or_else(|| ApiError::not_found(ASSIGNMENT_NOT_FOUND))
}

fn require_author(principal: &Principal, assignment: &Assignment) -> Result<(), ApiError> {
    principal.require_account(Role::Teacher, assignment.teacher_id)
}

fn require_enrolled(student: &Account, assignment: &Assignment) -> Result<(), ApiError> {
    if student.profile.institution() != Some(assignment.school.as_str())
        || student.profile.grade() != Some(assignment.grade.as_str())
    {
        return Err(ApiError::forbidden());
    }
    Ok(())
}

#[utoipa::path(
    put,
    path = "/v1/assignments/{id}",
    params(("id" = String, Path, description = "Composite id `{teacherId}@{nonce}`")),
    request_body = PostAssignmentRequest,
    responses(
        (status = 201, description = "Assignment published", body = MessageResponse),
        (status = 400, description = "Invalid assignment", body = MessageResponse),
        (status = 403, description = "Caller does not own the id", body = MessageResponse),
        (status = 409, description = "Assignment id already used", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "assignments"
)]
#[instrument(skip(state, headers, payload))]
pub async fn post_assignment(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<PostAssignmentRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    principal.require_role(Role::Teacher)?;
    if composite_owner(&id) != Some(principal.account_id.to_string().as_str()) {
        return Err(ApiError::forbidden());
    }

    let request = require_payload(payload)?;
    let title = required(Some(&request.title), "title")?;
    let deadline = required(Some(&request.deadline), "deadline")?;
    let grade = required(Some(&request.grade), "grade")?;
    let subject = required(Some(&request.subject), "subject")?;
    let questions = validate_questions(request.questions)?;

    let teacher = load_account(&state, Role::Teacher, principal.account_id, "Not Found").await?;
    let school = teacher
        .profile
        .institution()
        .map(str::to_string)
        .ok_or_else(ApiError::forbidden)?;

    let assignment = Assignment {
        id: id.clone(),
        teacher_id: teacher.id,
        title,
        questions,
        publish_date: Utc::now(),
        deadline,
        school,
        grade,
        subject,
        submissions: Vec::new(),
    };

    if state.store().insert_assignment(&assignment).await? == InsertOutcome::Conflict {
        return Err(ApiError::conflict("Assignment already exists"));
    }
    state
        .store()
        .add_membership(teacher.id, Membership::Assignments, &id)
        .await?;

    let event = NotificationEvent::assignment(teacher.id, &teacher.name);
    let students = enrolled_students(&state, &assignment).await?;
    for student in &students {
        state.store().push_notification(student.id, &event).await?;
    }

    info!(
        assignment_id = %id,
        notified = students.len(),
        "assignment published"
    );
    Ok(acknowledge(StatusCode::CREATED, "Assignment Saved"))
}

#[utoipa::path(
    get,
    path = "/v1/assignments/{id}",
    params(("id" = String, Path, description = "Assignment id")),
    responses(
        (status = 200, description = "Full assignment for its author, answers hidden for students", body = Assignment),
        (status = 403, description = "Caller may not view this assignment", body = MessageResponse),
        (status = 404, description = "Assignment not found", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "assignments"
)]
pub async fn get_assignment(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<axum::response::Response, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let assignment = find(&state, &id).await?;

    match principal.role {
        Role::Teacher => {
            require_author(&principal, &assignment)?;
            Ok(Json(assignment).into_response())
        }
        Role::Student => {
            let student =
                load_account(&state, Role::Student, principal.account_id, "Not Found").await?;
            require_enrolled(&student, &assignment)?;
            let submitted = assignment.submission_of(student.id).is_some();
            Ok(Json(StudentAssignmentView {
                questions: assignment
                    .questions
                    .iter()
                    .map(|question| QuestionView {
                        text: question.text.clone(),
                        options: question.options.clone(),
                        marks: question.marks,
                    })
                    .collect(),
                id: assignment.id,
                teacher_id: assignment.teacher_id,
                title: assignment.title,
                publish_date: assignment.publish_date,
                deadline: assignment.deadline,
                school: assignment.school,
                grade: assignment.grade,
                subject: assignment.subject,
                submitted,
            })
            .into_response())
        }
        Role::Mentor | Role::LocalAdmin | Role::GlobalAdmin => Err(ApiError::forbidden()),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/assignments/{id}",
    params(("id" = String, Path, description = "Assignment id")),
    responses(
        (status = 200, description = "Assignment deleted", body = MessageResponse),
        (status = 403, description = "Caller is not the author", body = MessageResponse),
        (status = 404, description = "Assignment not found", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "assignments"
)]
#[instrument(skip(state, headers))]
pub async fn delete_assignment(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    principal.require_role(Role::Teacher)?;
    let assignment = find(&state, &id).await?;
    require_author(&principal, &assignment)?;

    if !state.store().delete_assignment(&id).await? {
        return Err(ApiError::not_found(ASSIGNMENT_NOT_FOUND));
    }

    info!(assignment_id = %id, "assignment deleted");
    Ok(acknowledge(StatusCode::OK, "Deleted Successfully"))
}

#[utoipa::path(
    put,
    path = "/v1/assignments/{id}/submission",
    params(("id" = String, Path, description = "Assignment id")),
    request_body = SubmitRequest,
    responses(
        (status = 201, description = "Submission graded", body = SubmitResponse),
        (status = 400, description = "More answers than questions", body = MessageResponse),
        (status = 403, description = "Caller is not enrolled for it", body = MessageResponse),
        (status = 404, description = "Assignment not found", body = MessageResponse),
        (status = 409, description = "Already submitted", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "assignments"
)]
#[instrument(skip(state, headers, payload))]
pub async fn submit_assignment(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<SubmitRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    principal.require_role(Role::Student)?;
    let request = require_payload(payload)?;

    let assignment = find(&state, &id).await?;
    if request.answers.len() > assignment.questions.len() {
        return Err(ApiError::validation("More answers than questions"));
    }
    let student = load_account(&state, Role::Student, principal.account_id, "Not Found").await?;
    require_enrolled(&student, &assignment)?;

    let score = grade(&assignment.questions, &request.answers);
    let submission = Submission {
        student_id: student.id,
        student_name: student.name.clone(),
        answers: request.answers,
        points: score.to_string(),
        submitted_at: Utc::now(),
    };

    match state.store().record_submission(&id, &submission).await? {
        SubmissionOutcome::Recorded => {}
        SubmissionOutcome::AlreadySubmitted => {
            return Err(ApiError::conflict("Already Submitted"));
        }
        SubmissionOutcome::Missing => return Err(ApiError::not_found(ASSIGNMENT_NOT_FOUND)),
    }

    state
        .store()
        .push_notification(
            assignment.teacher_id,
            &NotificationEvent::submission(student.id, &student.name),
        )
        .await?;

    info!(assignment_id = %id, student_id = %student.id, marks = %score, "assignment submitted");
    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            marks: submission.points,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/assignments/{id}/submission",
    params(("id" = String, Path, description = "Assignment id")),
    responses(
        (status = 200, description = "Caller's answers and marks", body = OwnSubmissionView),
        (status = 404, description = "Assignment or submission not found", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "assignments"
)]
pub async fn own_submission(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    principal.require_role(Role::Student)?;
    let assignment = find(&state, &id).await?;

    let submission = assignment
        .submission_of(principal.account_id)
        .ok_or_else(|| ApiError::not_found("Submission Not Found"))?;

    Ok(Json(OwnSubmissionView {
        answers: submission.answers.clone(),
        marks: submission.points.clone(),
        questions: assignment.questions.clone(),
    }))
}

#[utoipa::path(
    get,
    path = "/v1/assignments/{id}/submissions",
    params(("id" = String, Path, description = "Assignment id")),
    responses(
        (status = 200, description = "Submitted and missing students", body = SubmissionsReport),
        (status = 403, description = "Caller is not the author", body = MessageResponse),
        (status = 404, description = "Assignment not found", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "assignments"
)]
pub async fn assignment_submissions(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let assignment = find(&state, &id).await?;
    require_author(&principal, &assignment)?;

    let students = enrolled_students(&state, &assignment).await?;
    Ok(Json(submissions_report(&assignment, &students)))
}

/// Split the enrolled students by whether they submitted; submissions from
/// students no longer enrolled are left out.
fn submissions_report(assignment: &Assignment, students: &[Account]) -> SubmissionsReport {
    let mut report = SubmissionsReport {
        submitted: Vec::new(),
        unsubmitted: Vec::new(),
    };
    for student in students {
        match assignment.submission_of(student.id) {
            Some(submission) => report.submitted.push(SubmittedEntry {
                id: student.id,
                name: submission.student_name.clone(),
                marks: submission.points.clone(),
            }),
            None => report.unsubmitted.push(UnsubmittedEntry {
                id: student.id,
                name: student.name.clone(),
            }),
        }
    }
    report
}

#[utoipa::path(
    get,
    path = "/v1/assignments",
    params(AssignmentQuery),
    responses((status = 200, description = "Matching assignments, newest first", body = [AssignmentSummary])),
    security(("bearer" = [])),
    tag = "assignments"
)]
pub async fn list_assignments(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AssignmentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers, &state).await?;
    let filter = AssignmentFilter {
        school: non_blank(query.school),
        grade: non_blank(query.grade),
        subject: non_blank(query.subject),
        teacher_id: None,
    };
    let assignments = state.store().list_assignments(&filter).await?;
    Ok(Json(
        assignments
            .iter()
            .map(AssignmentSummary::from)
            .collect::<Vec<_>>(),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/teachers/{id}/assignments",
    params(("id" = String, Path, description = "Teacher id")),
    responses((status = 200, description = "Assignments the teacher authored", body = [AssignmentSummary])),
    security(("bearer" = [])),
    tag = "assignments"
)]
pub async fn teacher_assignments(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers, &state).await?;
    let teacher_id = parse_account_id(&id, "Not Found")?;
    let filter = AssignmentFilter {
        teacher_id: Some(teacher_id),
        ..AssignmentFilter::default()
    };
    let assignments = state.store().list_assignments(&filter).await?;
    Ok(Json(
        assignments
            .iter()
            .map(AssignmentSummary::from)
            .collect::<Vec<_>>(),
    ))
}
