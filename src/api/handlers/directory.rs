//! Read-only directory listings used by the clients.

use axum::{
    Json,
    extract::{Extension, Query},
    http::HeaderMap,
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;

use super::{accounts::AccountView, auth::require_auth, load_account};
use crate::{
    api::{
        error::{ApiError, MessageResponse},
        state::AppState,
    },
    domain::Role,
    store::AccountFilter,
};

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StudentQuery {
    /// Only students of this grade.
    pub grade: Option<String>,
}

async fn list(
    state: &AppState,
    filter: &AccountFilter,
) -> Result<Json<Vec<AccountView>>, ApiError> {
    let accounts = state.store().list_accounts(filter).await?;
    Ok(Json(accounts.iter().map(AccountView::from).collect()))
}

/// Institution of the calling staff member; staff without one see nothing.
async fn own_institution(state: &AppState, role: Role, id: uuid::Uuid) -> Result<String, ApiError> {
    let account = load_account(state, role, id, "Not Found").await?;
    account
        .profile
        .institution()
        .map(str::to_string)
        .ok_or_else(ApiError::forbidden)
}

#[utoipa::path(
    get,
    path = "/v1/directory/schools",
    responses((status = 200, description = "Institutions with a verified local admin", body = [String])),
    tag = "directory"
)]
pub async fn schools(state: Extension<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store().list_verified_institutions().await?))
}

#[utoipa::path(
    get,
    path = "/v1/directory/mentors",
    responses(
        (status = 200, description = "All mentors", body = [AccountView]),
        (status = 403, description = "Caller is not a global admin", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "directory"
)]
pub async fn mentors(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers, &state)
        .await?
        .require_role(Role::GlobalAdmin)?;
    list(&state, &AccountFilter::role(Role::Mentor)).await
}

#[utoipa::path(
    get,
    path = "/v1/directory/local-admins",
    responses(
        (status = 200, description = "All local admins", body = [AccountView]),
        (status = 403, description = "Caller is not a global admin", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "directory"
)]
pub async fn local_admins(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers, &state)
        .await?
        .require_role(Role::GlobalAdmin)?;
    list(&state, &AccountFilter::role(Role::LocalAdmin)).await
}

#[utoipa::path(
    get,
    path = "/v1/directory/teachers",
    responses(
        (status = 200, description = "Teachers of the caller's institution", body = [AccountView]),
        (status = 403, description = "Caller is not a local admin", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "directory"
)]
pub async fn teachers(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    principal.require_role(Role::LocalAdmin)?;
    let institution = own_institution(&state, Role::LocalAdmin, principal.account_id).await?;
    list(
        &state,
        &AccountFilter::role(Role::Teacher).with_institution(institution),
    )
    .await
}

#[utoipa::path(
    get,
    path = "/v1/directory/students",
    params(StudentQuery),
    responses(
        (status = 200, description = "Students of the caller's institution", body = [AccountView]),
        (status = 403, description = "Caller is not a teacher", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "directory"
)]
pub async fn students(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StudentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    principal.require_role(Role::Teacher)?;
    let institution = own_institution(&state, Role::Teacher, principal.account_id).await?;
    let grade = query
        .grade
        .map(|grade| grade.trim().to_string())
        .filter(|grade| !grade.is_empty());
    list(
        &state,
        &AccountFilter::role(Role::Student)
            .with_institution(institution)
            .with_grade(grade),
    )
    .await
}
