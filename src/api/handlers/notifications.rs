use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::auth::require_auth;
use crate::{
    api::{
        error::{ApiError, MessageResponse, acknowledge},
        state::AppState,
    },
    domain::Notification,
};

#[utoipa::path(
    get,
    path = "/v1/notifications",
    responses(
        (status = 200, description = "Caller's notifications, newest first", body = [Notification]),
        (status = 401, description = "Not authenticated", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "notifications"
)]
pub async fn list_notifications(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let notifications = state
        .store()
        .list_notifications(principal.account_id)
        .await?;
    Ok(Json(notifications))
}

#[utoipa::path(
    delete,
    path = "/v1/notifications/{notification_id}",
    params(("notification_id" = String, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Notification cleared", body = MessageResponse),
        (status = 404, description = "No such notification for the caller", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "notifications"
)]
#[instrument(skip(state, headers))]
pub async fn clear_notification(
    Path(notification_id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let notification_id =
        Uuid::parse_str(&notification_id).map_err(|_| ApiError::not_found("Not Found"))?;

    if state
        .store()
        .clear_notification(principal.account_id, notification_id)
        .await?
    {
        Ok(acknowledge(StatusCode::OK, "Notification cleared"))
    } else {
        Err(ApiError::not_found("Not Found"))
    }
}
