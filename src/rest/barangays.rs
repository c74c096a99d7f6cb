//! Barangay directory. Reads are public; writes need an admin session.

use std::sync::Arc;

use axum::extract::State;
use tracing::info;

use super::extract::{require_admin, ApiJson, ApiQuery, ListQuery, PathId};
use super::{respond, ApiResult, AppState, Page};
use crate::auth::Identity;
use crate::error::AppError;
use crate::models::{Barangay, BarangayChanges, Dashboard, NewBarangay};
use crate::storage::StorageError;

pub async fn list(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<Barangay>> {
    let window = query.window();
    let items = state.storage.list_barangays(window)?;
    let total = state.storage.count_barangays()?;
    Ok(respond(
        "Barangays",
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
    PathId(id): PathId,
) -> ApiResult<Barangay> {
    let barangay = state
        .storage
        .get_barangay(id)?
        .ok_or(StorageError::NotFound("barangay"))?;
    Ok(respond("Barangay", barangay))
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    PathId(id): PathId,
) -> ApiResult<Dashboard> {
    Ok(respond("Barangay dashboard", state.storage.dashboard(id)?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    ApiJson(payload): ApiJson<NewBarangay>,
) -> ApiResult<Barangay> {
    require_admin(&identity)?;
    payload.validate().map_err(AppError::BadRequest)?;
    let barangay = state.storage.create_barangay(&payload)?;
    info!(barangay_id = %barangay.id, by = %identity.user_id, "barangay created");
    Ok(respond("Barangay created", barangay))
}

/// Admins may only edit their own barangay.
pub async fn update(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
    ApiJson(changes): ApiJson<BarangayChanges>,
) -> ApiResult<Barangay> {
    require_admin(&identity)?;
    if identity.barangay_id != id {
        return Err(AppError::Unauthorized);
    }
    changes.validate().map_err(AppError::BadRequest)?;
    let barangay = state.storage.update_barangay(id, &changes)?;
    Ok(respond("Barangay updated", barangay))
}
