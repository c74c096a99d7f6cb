//! Resident feedback on projects and the replies under it.
//!
//! Any member of the barangay may post. Edits are limited to the author;
//! deletes to the author or an admin of the barangay.

use std::sync::Arc;

use axum::extract::State;
use serde::Deserialize;
use tracing::info;

use super::extract::{require_admin, ApiJson, ApiQuery, ListQuery, PathId};
use super::{deleted, respond, ApiResult, AppState, Deleted, Page};
use crate::auth::Identity;
use crate::error::AppError;
use crate::ids::Id;
use crate::models::{
    Feedback, FeedbackChanges, FeedbackReply, FeedbackStatus, NewFeedback, NewFeedbackReply,
    StatusChange,
};

#[derive(Deserialize)]
pub struct ReplyEdit {
    pub content: String,
}

fn author_only(identity: &Identity, author: Id) -> Result<(), AppError> {
    if identity.user_id == author {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

fn author_or_admin(identity: &Identity, author: Id) -> Result<(), AppError> {
    if identity.user_id == author || identity.is_admin() {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(project_id): PathId,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<Feedback>> {
    let filter = query.status_filter::<FeedbackStatus>()?;
    let window = query.window();
    let items = state
        .storage
        .list_feedback(identity.barangay_id, project_id, filter, window)?;
    let total = state
        .storage
        .count_feedback(identity.barangay_id, project_id, filter)?;
    Ok(respond(
        "Feedback",
        Page {
            items,
            total,
            page: window.page,
            limit: window.limit,
        },
    ))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
) -> ApiResult<Feedback> {
    let feedback = state.storage.get_feedback(identity.barangay_id, id)?;
    Ok(respond("Feedback", feedback))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    ApiJson(payload): ApiJson<NewFeedback>,
) -> ApiResult<Feedback> {
    payload.validate().map_err(AppError::BadRequest)?;
    let feedback = state
        .storage
        .create_feedback(identity.barangay_id, identity.user_id, &payload)?;
    info!(feedback_id = %feedback.id, project_id = %feedback.project_id, "feedback submitted");
    Ok(respond("Feedback submitted", feedback))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
    ApiJson(changes): ApiJson<FeedbackChanges>,
) -> ApiResult<Feedback> {
    changes.validate().map_err(AppError::BadRequest)?;
    let current = state.storage.get_feedback(identity.barangay_id, id)?;
    author_only(&identity, current.user_id)?;
    let feedback = state
        .storage
        .update_feedback(identity.barangay_id, id, &changes)?;
    Ok(respond("Feedback updated", feedback))
}

pub async fn set_status(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
    ApiJson(change): ApiJson<StatusChange<FeedbackStatus>>,
) -> ApiResult<Feedback> {
    require_admin(&identity)?;
    let feedback = state
        .storage
        .set_feedback_status(identity.barangay_id, id, change.status)?;
    info!(feedback_id = %id, status = ?change.status, "feedback status changed");
    Ok(respond("Feedback status updated", feedback))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
) -> ApiResult<Deleted> {
    let current = state.storage.get_feedback(identity.barangay_id, id)?;
    author_or_admin(&identity, current.user_id)?;
    let removed = state.storage.delete_feedback(identity.barangay_id, id)?;
    deleted(removed, "feedback", id)
}

// --- Replies ---

pub async fn list_replies(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(feedback_id): PathId,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<FeedbackReply>> {
    let window = query.window();
    let items = state
        .storage
        .list_replies(identity.barangay_id, feedback_id, window)?;
    let total = state
        .storage
        .count_replies(identity.barangay_id, feedback_id)?;
    Ok(respond(
        "Feedback replies",
        Page {
            items,
            total,
            page: window.page,
            limit: window.limit,
        },
    ))
}

pub async fn create_reply(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    ApiJson(payload): ApiJson<NewFeedbackReply>,
) -> ApiResult<FeedbackReply> {
    payload.validate().map_err(AppError::BadRequest)?;
    let reply = state
        .storage
        .create_reply(identity.barangay_id, identity.user_id, &payload)?;
    Ok(respond("Reply posted", reply))
}

pub async fn update_reply(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
    ApiJson(edit): ApiJson<ReplyEdit>,
) -> ApiResult<FeedbackReply> {
    if edit.content.trim().is_empty() {
        return Err(AppError::BadRequest("content is required".to_string()));
    }
    let current = state.storage.get_reply(identity.barangay_id, id)?;
    author_only(&identity, current.user_id)?;
    let reply = state
        .storage
        .update_reply(identity.barangay_id, id, &edit.content)?;
    Ok(respond("Reply updated", reply))
}

pub async fn delete_reply(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
) -> ApiResult<Deleted> {
    let current = state.storage.get_reply(identity.barangay_id, id)?;
    author_or_admin(&identity, current.user_id)?;
    let removed = state.storage.delete_reply(identity.barangay_id, id)?;
    deleted(removed, "feedback reply", id)
}
