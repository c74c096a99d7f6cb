//! Budget categories (per barangay) and budget items (per project).

use std::sync::Arc;

use axum::extract::State;
use tokio::task::JoinHandle;
use tracing::info;

use super::extract::{require_admin, ApiJson, ApiQuery, ListQuery, PathId};
use super::{deleted, respond, ApiResult, AppState, Deleted, Page};
use crate::auth::Identity;
use crate::error::AppError;
use crate::models::{
    BudgetCategory, BudgetCategoryChanges, BudgetItem, BudgetItemChanges, BudgetStatus,
    NewBudgetCategory, NewBudgetItem, StatusChange,
};
use crate::storage::StorageResult;

// --- Categories ---

pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<BudgetCategory>> {
    let filter = query.status_filter::<BudgetStatus>()?;
    let window = query.window();
    let items = state
        .storage
        .list_categories(identity.barangay_id, filter, window)?;
    let total = state.storage.count_categories(identity.barangay_id, filter)?;
    Ok(respond(
        "Budget categories",
        Page {
            items,
            total,
            page: window.page,
            limit: window.limit,
        },
    ))
}

pub async fn get_category(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
) -> ApiResult<BudgetCategory> {
    let category = state.storage.get_category(identity.barangay_id, id)?;
    Ok(respond("Budget category", category))
}

pub async fn create_category(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    ApiJson(payload): ApiJson<NewBudgetCategory>,
) -> ApiResult<BudgetCategory> {
    require_admin(&identity)?;
    payload.validate().map_err(AppError::BadRequest)?;
    let category = state.storage.create_category(identity.barangay_id, &payload)?;
    info!(category_id = %category.id, barangay_id = %identity.barangay_id, "budget category created");
    Ok(respond("Budget category created", category))
}

pub async fn update_category(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
    ApiJson(changes): ApiJson<BudgetCategoryChanges>,
) -> ApiResult<BudgetCategory> {
    require_admin(&identity)?;
    changes.validate().map_err(AppError::BadRequest)?;
    let category = state
        .storage
        .update_category(identity.barangay_id, id, &changes)?;
    Ok(respond("Budget category updated", category))
}

pub async fn set_category_status(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
    ApiJson(change): ApiJson<StatusChange<BudgetStatus>>,
) -> ApiResult<BudgetCategory> {
    require_admin(&identity)?;
    let category = state
        .storage
        .set_category_status(identity.barangay_id, id, change.status)?;
    info!(category_id = %id, status = ?change.status, "budget category status changed");
    Ok(respond("Budget category status updated", category))
}

pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
) -> ApiResult<Deleted> {
    require_admin(&identity)?;
    let removed = state.storage.delete_category(identity.barangay_id, id)?;
    deleted(removed, "budget category", id)
}

// --- Items ---

async fn joined<T>(task: JoinHandle<StorageResult<T>>) -> Result<T, AppError> {
    Ok(task.await??)
}

/// Runs the page query and the count query side by side on the blocking
/// pool; the first failure of either fails the request.
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(project_id): PathId,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<BudgetItem>> {
    let filter = query.status_filter::<BudgetStatus>()?;
    let window = query.window();
    let barangay_id = identity.barangay_id;

    let rows = {
        let storage = state.storage.clone();
        tokio::task::spawn_blocking(move || {
            storage.list_items(barangay_id, project_id, filter, window)
        })
    };
    let count = {
        let storage = state.storage.clone();
        tokio::task::spawn_blocking(move || storage.count_items(barangay_id, project_id, filter))
    };
    let (items, total) = futures::try_join!(joined(rows), joined(count))?;

    Ok(respond(
        "Budget items",
        Page {
            items,
            total,
            page: window.page,
            limit: window.limit,
        },
    ))
}

pub async fn get_item(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
) -> ApiResult<BudgetItem> {
    let item = state.storage.get_item(identity.barangay_id, id)?;
    Ok(respond("Budget item", item))
}

pub async fn create_item(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    ApiJson(payload): ApiJson<NewBudgetItem>,
) -> ApiResult<BudgetItem> {
    require_admin(&identity)?;
    payload.validate().map_err(AppError::BadRequest)?;
    let item = state.storage.create_item(identity.barangay_id, &payload)?;
    info!(item_id = %item.id, project_id = %item.project_id, "budget item created");
    Ok(respond("Budget item created", item))
}

pub async fn update_item(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
    ApiJson(changes): ApiJson<BudgetItemChanges>,
) -> ApiResult<BudgetItem> {
    require_admin(&identity)?;
    changes.validate().map_err(AppError::BadRequest)?;
    let item = state.storage.update_item(identity.barangay_id, id, &changes)?;
    Ok(respond("Budget item updated", item))
}

pub async fn set_item_status(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
    ApiJson(change): ApiJson<StatusChange<BudgetStatus>>,
) -> ApiResult<BudgetItem> {
    require_admin(&identity)?;
    let item = state
        .storage
        .set_item_status(identity.barangay_id, id, change.status)?;
    Ok(respond("Budget item status updated", item))
}

pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathId(id): PathId,
) -> ApiResult<Deleted> {
    require_admin(&identity)?;
    let removed = state.storage.delete_item(identity.barangay_id, id)?;
    deleted(removed, "budget item", id)
}
