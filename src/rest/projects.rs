use std::sync::Arc;

use axum::extract::State;
use tracing::info;

use super::extract::{require_admin, ApiJson, ApiQuery, ListQuery, PathId};
use super::{deleted, respond, ApiResult, AppState, Deleted, Page};
use crate::auth::Identity;
use crate::error::AppError;
use crate::models::{NewProject, Project, ProjectChanges, ProjectStatus, StatusChange};

pub async fn list(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<Project>> {
    let filter = query.status_filter::<ProjectStatus>()?;
    let window = query.window();
    let items = state
        .storage
        .list_projects(identity.barangay_id, filter, window)?;
    let total = state.storage.count_projects(identity.barangay_id, filter)?;
    Ok(respond(
        "Projects",
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
) -> ApiResult<Project> {
    let project = state.storage.get_project(identity.barangay_id, id)?;
    Ok(respond("Project", project))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    ApiJson(payload): ApiJson<NewProject>,
) -> ApiResult<Project> {
    require_admin(&identity)?;
    payload.validate().map_err(AppError::BadRequest)?;
    let project = state.storage.create_project(identity.barangay_id, &payload)?;
    info!(project_id = %project.id, barangay_id = %identity.barangay_id, "project created");
    Ok(respond("Project created", project))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
    ApiJson(changes): ApiJson<ProjectChanges>,
) -> ApiResult<Project> {
    require_admin(&identity)?;
    changes.validate().map_err(AppError::BadRequest)?;
    let project = state
        .storage
        .update_project(identity.barangay_id, id, &changes)?;
    Ok(respond("Project updated", project))
}

pub async fn set_status(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
    ApiJson(change): ApiJson<StatusChange<ProjectStatus>>,
) -> ApiResult<Project> {
    require_admin(&identity)?;
    let project = state
        .storage
        .set_project_status(identity.barangay_id, id, change.status)?;
    info!(project_id = %id, status = ?change.status, "project status changed");
    Ok(respond("Project status updated", project))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
) -> ApiResult<Deleted> {
    require_admin(&identity)?;
    let removed = state.storage.delete_project(identity.barangay_id, id)?;
    deleted(removed, "project", id)
}
