//! Moderated message threads.
//!
//! Students open threads; students, teachers and mentors reply. Votes toggle
//! per voter, and once a thread collects enough distinct reports it is deleted
//! together with its image and the author is told why.

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{auth::require_auth, load_account, parse_account_id, required};
use crate::{
    api::{
        blobs::{decode_key, owner_of},
        error::{ApiError, MessageResponse, acknowledge, require_payload},
        state::AppState,
    },
    domain::{
        MessageThread, NotificationEvent, Reply, Role, SenderKind, VoteDirection, composite_owner,
        order_replies,
    },
    store::{InsertOutcome, Membership, ReportOutcome, ThreadFilter},
};

const THREAD_NOT_FOUND: &str = "Message Not Found";

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub body: String,
    /// Key returned by the media upload endpoint.
    pub image_key: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub body: String,
    pub image_key: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct VoteResponse {
    pub len: usize,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    pub already_reported: bool,
}

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ThreadQuery {
    /// Only threads of this school.
    pub school: Option<String>,
}

/// Validate an attached image key; only the uploader may attach it.
fn image_key(value: Option<&str>, poster: Uuid) -> Result<Option<String>, ApiError> {
    let Some(key) = value.map(str::trim).filter(|key| !key.is_empty()) else {
        return Ok(None);
    };
    let path = decode_key(key).ok_or_else(|| ApiError::validation("Invalid image key"))?;
    if owner_of(&path) != Some(poster) {
        return Err(ApiError::forbidden());
    }
    Ok(Some(key.to_string()))
}

fn ordered(mut thread: MessageThread) -> MessageThread {
    order_replies(&mut thread.replies);
    thread
}

async fn list(
    state: &AppState,
    filter: &ThreadFilter,
) -> Result<Json<Vec<MessageThread>>, ApiError> {
    let threads = state.store().list_threads(filter).await?;
    Ok(Json(threads.into_iter().map(ordered).collect()))
}

#[utoipa::path(
    put,
    path = "/v1/messages/{id}",
    params(("id" = String, Path, description = "Composite id `{studentId}@{nonce}`")),
    request_body = PostMessageRequest,
    responses(
        (status = 201, description = "Message saved", body = MessageResponse),
        (status = 403, description = "Caller owns neither id nor image", body = MessageResponse),
        (status = 409, description = "Message id already used", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "messages"
)]
#[instrument(skip(state, headers, payload))]
pub async fn post_message(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<PostMessageRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    principal.require_role(Role::Student)?;
    if composite_owner(&id) != Some(principal.account_id.to_string().as_str()) {
        return Err(ApiError::forbidden());
    }

    let request = require_payload(payload)?;
    let body = required(Some(&request.body), "body")?;
    let image_key = image_key(request.image_key.as_deref(), principal.account_id)?;
    let author = load_account(&state, Role::Student, principal.account_id, "Not Found").await?;
    let school = author
        .profile
        .institution()
        .map(str::to_string)
        .unwrap_or_default();

    let thread = MessageThread {
        id: id.clone(),
        author_id: author.id,
        author_name: author.name,
        author_gender: author.gender,
        body,
        image_key,
        tags: request
            .tags
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
        school,
        created_at: Utc::now(),
        replies: Vec::new(),
        upvoters: Vec::new(),
        downvoters: Vec::new(),
        reporters: Vec::new(),
    };

    if state.store().insert_thread(&thread).await? == InsertOutcome::Conflict {
        return Err(ApiError::conflict("Message already exists"));
    }
    state
        .store()
        .add_membership(principal.account_id, Membership::Messages, &id)
        .await?;

    info!(thread_id = %id, "message thread created");
    Ok(acknowledge(StatusCode::CREATED, "Message Saved"))
}

#[utoipa::path(
    get,
    path = "/v1/messages/{id}",
    params(("id" = String, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread with ordered replies", body = MessageThread),
        (status = 404, description = "Thread not found", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "messages"
)]
pub async fn get_message(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers, &state).await?;
    let thread = state
        .store()
        .find_thread(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(THREAD_NOT_FOUND))?;
    Ok(Json(ordered(thread)))
}

#[utoipa::path(
    get,
    path = "/v1/messages",
    params(ThreadQuery),
    responses((status = 200, description = "Threads, newest first", body = [MessageThread])),
    security(("bearer" = [])),
    tag = "messages"
)]
pub async fn list_messages(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ThreadQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers, &state).await?;
    let filter = ThreadFilter {
        school: query
            .school
            .map(|school| school.trim().to_string())
            .filter(|school| !school.is_empty()),
        author_id: None,
    };
    list(&state, &filter).await
}

#[utoipa::path(
    get,
    path = "/v1/authors/{id}/messages",
    params(("id" = String, Path, description = "Student id")),
    responses((status = 200, description = "Threads the student authored", body = [MessageThread])),
    security(("bearer" = [])),
    tag = "messages"
)]
pub async fn author_messages(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers, &state).await?;
    let author_id = parse_account_id(&id, "Not Found")?;
    let filter = ThreadFilter {
        school: None,
        author_id: Some(author_id),
    };
    list(&state, &filter).await
}

#[utoipa::path(
    put,
    path = "/v1/messages/{id}/replies",
    params(("id" = String, Path, description = "Thread id")),
    request_body = ReplyRequest,
    responses(
        (status = 201, description = "Reply added", body = MessageResponse),
        (status = 403, description = "Caller cannot reply or attach the image", body = MessageResponse),
        (status = 404, description = "Thread or sender not found", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "messages"
)]
#[instrument(skip(state, headers, payload))]
pub async fn post_reply(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<ReplyRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let sender_kind = SenderKind::from_role(principal.role).ok_or_else(ApiError::forbidden)?;

    let request = require_payload(payload)?;
    let body = required(Some(&request.body), "body")?;
    let image_key = image_key(request.image_key.as_deref(), principal.account_id)?;

    let thread = state
        .store()
        .find_thread(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(THREAD_NOT_FOUND))?;
    let sender = load_account(&state, principal.role, principal.account_id, "Not Found").await?;

    let reply = Reply {
        id: Uuid::new_v4(),
        sender_id: sender.id,
        sender_kind,
        sender_name: sender.name.clone(),
        sender_gender: sender.gender.clone(),
        body,
        image_key,
        created_at: Utc::now(),
    };
    if !state.store().append_reply(&id, &reply).await? {
        return Err(ApiError::not_found(THREAD_NOT_FOUND));
    }

    state
        .store()
        .add_membership(sender.id, Membership::Messages, &id)
        .await?;
    state
        .store()
        .push_notification(
            thread.author_id,
            &NotificationEvent::reply(sender.id, &sender.name),
        )
        .await?;

    Ok(acknowledge(StatusCode::CREATED, "Reply added"))
}

async fn vote(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
    direction: VoteDirection,
) -> Result<Json<VoteResponse>, ApiError> {
    let principal = require_auth(headers, state).await?;
    let len = state
        .store()
        .toggle_vote(id, principal.account_id, direction)
        .await?
        .ok_or_else(|| ApiError::not_found(THREAD_NOT_FOUND))?;
    Ok(Json(VoteResponse { len }))
}

#[utoipa::path(
    post,
    path = "/v1/messages/{id}/upvote",
    params(("id" = String, Path, description = "Thread id")),
    responses(
        (status = 200, description = "New number of upvotes", body = VoteResponse),
        (status = 404, description = "Thread not found", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "messages"
)]
pub async fn upvote(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    vote(&state, &headers, &id, VoteDirection::Up).await
}

#[utoipa::path(
    post,
    path = "/v1/messages/{id}/downvote",
    params(("id" = String, Path, description = "Thread id")),
    responses(
        (status = 200, description = "New number of downvotes", body = VoteResponse),
        (status = 404, description = "Thread not found", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "messages"
)]
pub async fn downvote(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    vote(&state, &headers, &id, VoteDirection::Down).await
}

#[utoipa::path(
    post,
    path = "/v1/messages/{id}/report",
    params(("id" = String, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Report recorded", body = ReportResponse),
        (status = 404, description = "Thread not found", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "messages"
)]
#[instrument(skip(state, headers))]
pub async fn report(
    Path(id): Path<String>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let threshold = state.config().report_threshold();

    let outcome = state
        .store()
        .add_report(&id, principal.account_id, threshold)
        .await?;

    let already_reported = match outcome {
        ReportOutcome::Missing => return Err(ApiError::not_found(THREAD_NOT_FOUND)),
        ReportOutcome::Duplicate => true,
        ReportOutcome::Recorded { .. } => false,
        ReportOutcome::Removed(thread) => {
            remove_reported(&state, &thread).await?;
            false
        }
    };

    Ok(Json(ReportResponse { already_reported }))
}

/// Clean up after the report that crossed the moderation threshold.
async fn remove_reported(state: &AppState, thread: &MessageThread) -> Result<(), ApiError> {
    info!(thread_id = %thread.id, "message thread removed by moderation");

    if let Some(path) = thread.image_key.as_deref().and_then(decode_key) {
        // Best effort; the thread row is already gone.
        if let Err(err) = state.blobs().delete(&path).await {
            error!("Failed to purge image of removed thread: {err:#}");
        }
    }

    state
        .store()
        .remove_membership(thread.author_id, Membership::Messages, &thread.id)
        .await?;
    state
        .store()
        .push_notification(thread.author_id, &NotificationEvent::moderation())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::blobs::{blob_path, encode_key};

    #[test]
    fn image_keys_must_decode() {
        let poster = Uuid::new_v4();
        assert!(matches!(image_key(None, poster), Ok(None)));
        assert!(matches!(image_key(Some("  "), poster), Ok(None)));
        assert!(matches!(
            image_key(Some("not-a-key"), poster),
            Err(ApiError::Validation(_))
        ));

        let key = encode_key(&blob_path(poster, "a.png"));
        assert!(matches!(image_key(Some(&key), poster), Ok(Some(found)) if found == key));
    }

    #[test]
    fn image_keys_of_other_accounts_are_forbidden() {
        let key = encode_key(&blob_path(Uuid::new_v4(), "a.png"));
        assert!(matches!(
            image_key(Some(&key), Uuid::new_v4()),
            Err(ApiError::Forbidden(_))
        ));
    }
}
