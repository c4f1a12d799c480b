//! Two-step password recovery by one-time code.
//!
//! The first step mails a six digit code and parks a digest of it in a ticket
//! keyed by account id; requesting again overwrites the ticket. The second
//! step consumes the ticket and replaces the password hash. Too many wrong
//! codes discard the ticket.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    auth::{
        password::hash_password,
        utils::{generate_otp, hash_otp},
    },
    parse_role, required,
};
use crate::{
    api::{
        email::MailMessage,
        error::{ApiError, MessageResponse, acknowledge, require_payload},
        state::AppState,
    },
    domain::Role,
    store::ResetTicket,
};

const INVALID_OTP: &str = "Invalid OTP";
/// Wrong codes tolerated before the ticket is discarded.
const MAX_OTP_FAILURES: u32 = 5;

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OtpRequest {
    pub role: String,
    pub phone_number: String,
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OtpResponse {
    pub message: String,
    pub user_id: Uuid,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    pub user_id: Uuid,
    pub role: String,
    pub otp: String,
    pub password: String,
}

fn invalid_otp() -> ApiError {
    ApiError::Unauthenticated(INVALID_OTP.to_string())
}

#[utoipa::path(
    post,
    path = "/v1/password-reset/otp",
    request_body = OtpRequest,
    responses(
        (status = 200, description = "Code mailed", body = OtpResponse),
        (status = 404, description = "No account matches role, phone and email", body = MessageResponse),
    ),
    tag = "password-reset"
)]
#[instrument(skip(state, payload))]
pub async fn request_otp(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<OtpRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = require_payload(payload)?;
    let role = parse_role(request.role.trim())?;
    let email = required(Some(&request.email), "email")?;

    let account = state
        .store()
        .find_account_by_phone(role, request.phone_number.trim())
        .await?
        .filter(|account| {
            account
                .email
                .as_deref()
                .is_some_and(|stored| stored.eq_ignore_ascii_case(&email))
        })
        .ok_or_else(|| ApiError::not_found("Not Found"))?;

    let ttl = state.config().password_reset_ttl_seconds();
    let otp = generate_otp();
    let message = MailMessage::password_reset(state.config().mail_from(), &email, &otp, ttl);
    state.mailer().send(&message).await?;

    let now = Utc::now();
    state
        .store()
        .upsert_reset_ticket(&ResetTicket {
            account_id: account.id,
            role,
            email,
            otp_hash: hash_otp(&otp),
            failed_attempts: 0,
            created_at: now,
            expires_at: now + Duration::seconds(ttl),
        })
        .await?;

    info!(account_id = %account.id, role = %role, "password reset code issued");
    Ok(Json(OtpResponse {
        message: "OTP sent".to_string(),
        user_id: account.id,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/password-reset/verify",
    request_body = ResetRequest,
    responses(
        (status = 200, description = "Password replaced", body = MessageResponse),
        (status = 400, description = "Blank password", body = MessageResponse),
        (status = 401, description = "Unknown, expired or wrong code", body = MessageResponse),
    ),
    tag = "password-reset"
)]
#[instrument(skip(state, payload))]
pub async fn verify_otp(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ResetRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = require_payload(payload)?;
    let role: Role = request.role.trim().parse().map_err(|_| invalid_otp())?;

    let ticket = state
        .store()
        .find_reset_ticket(request.user_id)
        .await?
        .ok_or_else(invalid_otp)?;
    if ticket.role != role || ticket.otp_hash != hash_otp(&request.otp) {
        warn!(account_id = %request.user_id, "password reset code rejected");
        let failures = state.store().record_reset_failure(request.user_id).await?;
        if failures.is_some_and(|count| count >= MAX_OTP_FAILURES) {
            state.store().delete_reset_ticket(request.user_id).await?;
            warn!(account_id = %request.user_id, "password reset code discarded");
        }
        return Err(invalid_otp());
    }

    if request.password.trim().is_empty() {
        return Err(ApiError::validation("Missing field: password"));
    }
    let password_hash = hash_password(&request.password)?;

    if !state.store().delete_reset_ticket(request.user_id).await? {
        warn!(account_id = %request.user_id, "password reset code already used");
        return Err(invalid_otp());
    }
    if !state
        .store()
        .set_password_hash(role, request.user_id, &password_hash)
        .await?
    {
        return Err(invalid_otp());
    }

    info!(account_id = %request.user_id, role = %role, "password reset");
    Ok(acknowledge(StatusCode::OK, "verified And Reset"))
}
