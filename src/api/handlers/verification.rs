//! Verification workflow.
//!
//! Global admins review mentors and local admins; local admins review the
//! teachers of their own institution. A decision only moves an account out of
//! `pending`; repeating the same decision is a no-op and contradicting an
//! earlier one is a conflict.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{info, instrument};

use super::{auth::require_auth, load_account, parse_account_id, parse_role};
use crate::{
    api::{
        error::{ApiError, MessageResponse, acknowledge},
        state::AppState,
    },
    domain::{Role, VerificationStatus},
    store::ReviewOutcome,
};

const fn applied_message(decision: VerificationStatus) -> &'static str {
    match decision {
        VerificationStatus::Rejected => "Rejected",
        VerificationStatus::Pending | VerificationStatus::Verified => "Verified",
    }
}

async fn decide(
    state: &AppState,
    headers: &HeaderMap,
    role: &str,
    id: &str,
    decision: VerificationStatus,
) -> Result<(StatusCode, axum::Json<MessageResponse>), ApiError> {
    let principal = require_auth(headers, state).await?;
    let role = parse_role(role)?;
    let reviewer = role.reviewer().ok_or_else(ApiError::forbidden)?;
    principal.require_role(reviewer)?;

    let missing = format!("{} Not Found", role.label());
    let account_id = parse_account_id(id, &missing)?;
    let target = load_account(state, role, account_id, &missing).await?;

    if reviewer == Role::LocalAdmin {
        let admin = load_account(state, Role::LocalAdmin, principal.account_id, "Not Found").await?;
        if admin.profile.institution() != target.profile.institution() {
            return Err(ApiError::forbidden());
        }
    }

    let outcome = state
        .store()
        .review_account(role, account_id, decision)
        .await?
        .ok_or_else(|| ApiError::not_found(missing.clone()))?;

    match outcome {
        ReviewOutcome::Applied => {
            info!(
                account_id = %account_id,
                reviewer_id = %principal.account_id,
                decision = decision.as_str(),
                "verification decision applied"
            );
            Ok(acknowledge(StatusCode::OK, applied_message(decision)))
        }
        ReviewOutcome::Unchanged(current) if current == decision => {
            Ok(acknowledge(StatusCode::OK, current.already_message()))
        }
        ReviewOutcome::Unchanged(current) => Err(ApiError::conflict(current.already_message())),
    }
}

#[utoipa::path(
    post,
    path = "/v1/verification/{role}/{id}/verify",
    params(
        ("role" = String, Path, description = "teacher, mentor or localAdmin"),
        ("id" = String, Path, description = "Account under review"),
    ),
    responses(
        (status = 200, description = "Verified, or already verified", body = MessageResponse),
        (status = 403, description = "Caller may not review this account", body = MessageResponse),
        (status = 404, description = "Account not found", body = MessageResponse),
        (status = 409, description = "Account was already rejected", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "verification"
)]
#[instrument(skip(state, headers))]
pub async fn verify(
    Path((role, id)): Path<(String, String)>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    decide(&state, &headers, &role, &id, VerificationStatus::Verified).await
}

#[utoipa::path(
    post,
    path = "/v1/verification/{role}/{id}/reject",
    params(
        ("role" = String, Path, description = "teacher, mentor or localAdmin"),
        ("id" = String, Path, description = "Account under review"),
    ),
    responses(
        (status = 200, description = "Rejected, or already rejected", body = MessageResponse),
        (status = 403, description = "Caller may not review this account", body = MessageResponse),
        (status = 404, description = "Account not found", body = MessageResponse),
        (status = 409, description = "Account was already verified", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "verification"
)]
#[instrument(skip(state, headers))]
pub async fn reject(
    Path((role, id)): Path<(String, String)>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    decide(&state, &headers, &role, &id, VerificationStatus::Rejected).await
}
