//! Account lifecycle: register, login, logout and edit-details, for every role.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    age_on,
    auth::{
        issue_session,
        password::{hash_password, verify_password},
        require_auth, revoke_session,
    },
    parse_account_id, parse_role, required, valid_email, valid_phone,
};
use crate::{
    api::{
        error::{ApiError, MessageResponse, acknowledge, require_payload},
        state::AppState,
    },
    domain::{Account, AccountUpdate, Profile, Role, VerificationStatus},
    store::InsertOutcome,
};

/// Public view of an account; credentials and membership sets never leave the server.
#[derive(ToSchema, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: Uuid,
    pub role: Role,
    pub phone_number: String,
    pub name: String,
    pub email: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub verification_status: Option<VerificationStatus>,
    #[schema(value_type = Object)]
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            role: account.role(),
            phone_number: account.phone_number.clone(),
            name: account.name.clone(),
            email: account.email.clone(),
            age: account.age,
            gender: account.gender.clone(),
            verification_status: account.verification,
            profile: account.profile.clone(),
            created_at: account.created_at,
        }
    }
}

#[derive(ToSchema, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    /// ISO `YYYY-MM-DD`.
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub password: Option<String>,
    pub grade: Option<String>,
    pub school: Option<String>,
    pub institution: Option<String>,
    pub subject_expertise: Option<Vec<String>>,
    pub qualification: Option<String>,
    pub resume_link: Option<String>,
    pub designation: Option<String>,
    pub address: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub phone_number: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub account: AccountView,
    pub token: String,
}

/// Partial update; fields a role cannot edit are ignored.
#[derive(ToSchema, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct EditDetailsRequest {
    pub name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub school: Option<String>,
    pub grade: Option<String>,
    pub institution: Option<String>,
    pub qualification: Option<String>,
    pub subject_expertise: Option<Vec<String>>,
    pub resume_link: Option<String>,
    pub designation: Option<String>,
    pub address: Option<String>,
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn subjects(values: Option<&Vec<String>>) -> Result<Vec<String>, ApiError> {
    let subjects: Vec<String> = values
        .into_iter()
        .flatten()
        .map(|subject| subject.trim().to_string())
        .filter(|subject| !subject.is_empty())
        .collect();
    if subjects.is_empty() {
        return Err(ApiError::validation("Missing field: subjectExpertise"));
    }
    Ok(subjects)
}

fn build_profile(role: Role, request: &RegisterRequest) -> Result<Profile, ApiError> {
    Ok(match role {
        Role::Student => Profile::Student {
            grade: required(request.grade.as_deref(), "grade")?,
            school: required(request.school.as_deref(), "school")?,
        },
        Role::Teacher => Profile::Teacher {
            institution: required(request.institution.as_deref(), "institution")?,
            subject_expertise: subjects(request.subject_expertise.as_ref())?,
            qualification: optional(request.qualification.as_deref()),
        },
        Role::Mentor => Profile::Mentor {
            institution: optional(request.institution.as_deref()),
            qualification: required(request.qualification.as_deref(), "qualification")?,
            subject_expertise: subjects(request.subject_expertise.as_ref())?,
            resume_link: required(request.resume_link.as_deref(), "resumeLink")?,
        },
        Role::LocalAdmin => Profile::LocalAdmin {
            institution: required(request.institution.as_deref(), "institution")?,
            designation: required(request.designation.as_deref(), "designation")?,
            address: optional(request.address.as_deref()),
        },
        Role::GlobalAdmin => Profile::GlobalAdmin,
    })
}

/// Keep only the fields `role` may edit.
fn editable_update(role: Role, request: EditDetailsRequest) -> Result<AccountUpdate, ApiError> {
    if request.age.is_some_and(|age| !(0..=150).contains(&age)) {
        return Err(ApiError::validation("Invalid age"));
    }
    let subject_expertise = match request.subject_expertise.as_ref() {
        Some(values) => Some(subjects(Some(values))?),
        None => None,
    };

    let mut update = AccountUpdate {
        name: optional(request.name.as_deref()),
        age: request.age,
        gender: optional(request.gender.as_deref()),
        ..AccountUpdate::default()
    };

    match role {
        Role::Student => {
            update.school = optional(request.school.as_deref());
            update.grade = optional(request.grade.as_deref());
        }
        Role::Teacher => {
            update.institution = optional(request.institution.as_deref());
            update.qualification = optional(request.qualification.as_deref());
            update.subject_expertise = subject_expertise;
        }
        Role::Mentor => {
            update.institution = optional(request.institution.as_deref());
            update.qualification = optional(request.qualification.as_deref());
            update.subject_expertise = subject_expertise;
            update.resume_link = optional(request.resume_link.as_deref());
        }
        Role::LocalAdmin => {
            update.designation = optional(request.designation.as_deref());
            update.address = optional(request.address.as_deref());
        }
        Role::GlobalAdmin => {}
    }

    Ok(update)
}

const fn blocked_message(status: VerificationStatus) -> &'static str {
    match status {
        VerificationStatus::Rejected => "Rejected",
        VerificationStatus::Pending | VerificationStatus::Verified => "Pending",
    }
}

#[utoipa::path(
    put,
    path = "/v1/accounts/{role}/register",
    params(("role" = String, Path, description = "student, teacher, mentor, localAdmin or globalAdmin")),
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account registered", body = MessageResponse),
        (status = 400, description = "Invalid or missing fields", body = MessageResponse),
        (status = 409, description = "Phone number already exists", body = MessageResponse),
    ),
    tag = "accounts"
)]
#[instrument(skip(state, payload))]
pub async fn register(
    Path(role): Path<String>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let role = parse_role(&role)?;
    let request = require_payload(payload)?;

    let name = required(request.name.as_deref(), "name")?;
    let phone_number = required(request.phone_number.as_deref(), "phoneNumber")?;
    if !valid_phone(&phone_number) {
        return Err(ApiError::validation("Invalid phone number"));
    }

    let email = request
        .email
        .as_deref()
        .map(|email| email.trim().to_lowercase())
        .filter(|email| !email.is_empty());
    match &email {
        Some(email) if !valid_email(email) => return Err(ApiError::validation("Invalid email")),
        None if role != Role::Student => {
            return Err(ApiError::validation("Missing field: email"));
        }
        _ => {}
    }

    let birth_date = required(request.birth_date.as_deref(), "birthDate")?;
    let age = age_on(&birth_date, Utc::now().date_naive())
        .ok_or_else(|| ApiError::validation("Invalid birth date"))?;

    let password = request.password.clone().unwrap_or_default();
    if password.trim().is_empty() {
        return Err(ApiError::validation("Invalid password"));
    }

    let profile = build_profile(role, &request)?;

    if state
        .store()
        .find_account_by_phone(role, &phone_number)
        .await?
        .is_some()
    {
        debug!("phone number already registered for {role}");
        return Err(ApiError::conflict("Phone number already exists"));
    }

    let account = Account {
        id: Uuid::new_v4(),
        phone_number,
        name,
        email,
        age: Some(age),
        gender: optional(request.gender.as_deref()),
        password_hash: hash_password(&password)?,
        verification: role
            .requires_verification()
            .then_some(VerificationStatus::Pending),
        profile,
        created_at: Utc::now(),
    };

    match state.store().insert_account(&account).await? {
        InsertOutcome::Created => {
            info!(account_id = %account.id, role = %role, "account registered");
            Ok(acknowledge(StatusCode::CREATED, "Registered"))
        }
        InsertOutcome::Conflict => Err(ApiError::conflict("Phone number already exists")),
    }
}

#[utoipa::path(
    post,
    path = "/v1/accounts/{role}/login",
    params(("role" = String, Path, description = "Account role")),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = LoginResponse),
        (status = 401, description = "Wrong password", body = MessageResponse),
        (status = 403, description = "Account pending or rejected", body = MessageResponse),
        (status = 404, description = "Unknown phone number", body = MessageResponse),
    ),
    tag = "accounts"
)]
#[instrument(skip(state, payload))]
pub async fn login(
    Path(role): Path<String>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let role = parse_role(&role)?;
    let request = require_payload(payload)?;

    let account = state
        .store()
        .find_account_by_phone(role, request.phone_number.trim())
        .await?
        .ok_or_else(|| ApiError::not_found("Not Found"))?;

    if let Some(status) = account.login_block() {
        return Err(ApiError::Forbidden(blocked_message(status).to_string()));
    }

    if !verify_password(&request.password, &account.password_hash) {
        return Err(ApiError::Unauthenticated("Not authorized".to_string()));
    }

    let token = issue_session(&state, account.id, role).await?;
    info!(account_id = %account.id, role = %role, "session issued");

    Ok(Json(LoginResponse {
        account: AccountView::from(&account),
        token,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/accounts/{role}/logout/{id}",
    params(
        ("role" = String, Path, description = "Account role"),
        ("id" = String, Path, description = "Account id"),
    ),
    responses(
        (status = 200, description = "Session revoked", body = MessageResponse),
        (status = 404, description = "No matching session", body = MessageResponse),
    ),
    tag = "accounts"
)]
#[instrument(skip(state, headers))]
pub async fn logout(
    Path((role, id)): Path<(String, String)>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let role = parse_role(&role)?;
    let account_id = parse_account_id(&id, "Not Found")?;

    if revoke_session(&state, &headers, role, account_id).await? {
        info!(account_id = %account_id, "session revoked");
        Ok(acknowledge(StatusCode::OK, "Logged out Successfully!"))
    } else {
        Err(ApiError::not_found("Not Found"))
    }
}

#[utoipa::path(
    patch,
    path = "/v1/accounts/{role}/edit-details/{id}",
    params(
        ("role" = String, Path, description = "Account role"),
        ("id" = String, Path, description = "Account id"),
    ),
    request_body = EditDetailsRequest,
    responses(
        (status = 200, description = "Updated account", body = AccountView),
        (status = 400, description = "No editable fields", body = MessageResponse),
        (status = 403, description = "Caller is not this account", body = MessageResponse),
        (status = 404, description = "Account not found", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "accounts"
)]
#[instrument(skip(state, headers, payload))]
pub async fn edit_details(
    Path((role, id)): Path<(String, String)>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<EditDetailsRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let role = parse_role(&role)?;
    let account_id = parse_account_id(&id, "Not Found")?;
    principal.require_account(role, account_id)?;

    let update = editable_update(role, require_payload(payload)?)?;
    if update.is_empty() {
        return Err(ApiError::validation("No editable fields"));
    }

    let account = state
        .store()
        .update_account(role, account_id, &update)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{} Not Found", role.label())))?;

    Ok(Json(AccountView::from(&account)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn student_profile_requires_school_and_grade() {
        let request = RegisterRequest {
            grade: Some("8".into()),
            ..RegisterRequest::default()
        };
        assert!(build_profile(Role::Student, &request).is_err());

        let request = RegisterRequest {
            grade: Some("8".into()),
            school: Some(" DPS ".into()),
            ..RegisterRequest::default()
        };
        assert!(matches!(
            build_profile(Role::Student, &request),
            Ok(Profile::Student { school, .. }) if school == "DPS"
        ));
    }

    #[test]
    fn teacher_profile_needs_subjects() {
        let request = RegisterRequest {
            institution: Some("DPS".into()),
            subject_expertise: Some(vec![" ".into()]),
            ..RegisterRequest::default()
        };
        assert!(build_profile(Role::Teacher, &request).is_err());
    }

    #[test]
    fn edits_drop_fields_outside_the_role() {
        let request = EditDetailsRequest {
            designation: Some("Principal".into()),
            ..EditDetailsRequest::default()
        };
        assert!(matches!(editable_update(Role::Student, request), Ok(update) if update.is_empty()));

        let request = EditDetailsRequest {
            designation: Some("Principal".into()),
            ..EditDetailsRequest::default()
        };
        assert!(matches!(
            editable_update(Role::LocalAdmin, request),
            Ok(update) if update.designation.as_deref() == Some("Principal")
        ));
    }

    #[test]
    fn edits_reject_impossible_ages() {
        let request = EditDetailsRequest {
            age: Some(-1),
            ..EditDetailsRequest::default()
        };
        assert!(editable_update(Role::GlobalAdmin, request).is_err());
    }
}
