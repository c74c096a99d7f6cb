//! REST API layer using Axum.
//!
//! Every protected handler follows the same chain: the [`Identity`] extractor
//! resolves the session cookie (401 when absent), the handler checks the role
//! it needs, and storage is called with the session's barangay id so rows of
//! other barangays are never visible.
//!
//! Responses use one envelope: `{"message", "data"}` on success and
//! `{"error"}` on failure (see [`crate::error::AppError`]).
//!
//! [`Identity`]: crate::auth::Identity

use std::sync::Arc;

use axum::{
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::Serialize;

use crate::auth::SessionStore;
use crate::config::Config;
use crate::error::AppError;
use crate::ids::Id;
use crate::storage::{Storage, StorageError, StorageResult};

pub mod barangays;
pub mod budget;
pub mod extract;
pub mod feedback;
pub mod projects;
pub mod users;

/// Shared app state for REST handlers (Arc-wrapped for concurrency)
pub struct AppState {
    pub storage: Storage,
    pub sessions: SessionStore,
    pub cookie_secure: bool,
    pub bcrypt_cost: u32,
}

impl AppState {
    pub fn new(storage: Storage, config: &Config) -> StorageResult<Self> {
        Ok(Self {
            sessions: SessionStore::open(&storage, config.session_ttl())?,
            storage,
            cookie_secure: config.cookie_secure,
            bcrypt_cost: config.bcrypt_cost,
        })
    }
}

/// Success envelope.
#[derive(Serialize, Debug)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: T,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

pub fn respond<T>(message: impl Into<String>, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        message: message.into(),
        data,
    })
}

/// One page of a list plus the unpaged total.
#[derive(Serialize, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Serialize, Debug)]
pub struct Deleted {
    pub id: Id,
}

/// Deletes succeed only when exactly one row went away.
fn deleted(removed: u64, label: &'static str, id: Id) -> ApiResult<Deleted> {
    if removed != 1 {
        return Err(StorageError::NotFound(label).into());
    }
    Ok(respond(format!("{label} deleted"), Deleted { id }))
}

pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let user_routes = Router::new()
        .route("/register", post(users::register))
        .route("/login", post(users::login))
        .route("/logout", post(users::logout))
        .route("/me", get(users::me).put(users::update_me))
        .route("/me/password", patch(users::change_password));

    let barangay_routes = Router::new()
        .route("/", get(barangays::list).post(barangays::create))
        .route("/:id", get(barangays::get_one).put(barangays::update))
        .route("/:id/dashboard", get(barangays::dashboard));

    let category_routes = Router::new()
        .route("/", get(budget::list_categories).post(budget::create_category))
        .route(
            "/:id",
            get(budget::get_category)
                .put(budget::update_category)
                .delete(budget::delete_category),
        )
        .route("/:id/status", patch(budget::set_category_status));

    let item_routes = Router::new()
        .route("/", post(budget::create_item))
        .route("/project/:project_id", get(budget::list_items))
        .route(
            "/:id",
            get(budget::get_item)
                .put(budget::update_item)
                .delete(budget::delete_item),
        )
        .route("/:id/status", patch(budget::set_item_status));

    let project_routes = Router::new()
        .route("/", get(projects::list).post(projects::create))
        .route(
            "/:id",
            get(projects::get_one)
                .put(projects::update)
                .delete(projects::delete),
        )
        .route("/:id/status", patch(projects::set_status));

    let feedback_routes = Router::new()
        .route("/", post(feedback::create))
        .route("/project/:project_id", get(feedback::list))
        .route(
            "/:id",
            get(feedback::get_one)
                .put(feedback::update)
                .delete(feedback::delete),
        )
        .route("/:id/status", patch(feedback::set_status));

    let reply_routes = Router::new()
        .route("/", post(feedback::create_reply))
        .route("/feedback/:feedback_id", get(feedback::list_replies))
        .route(
            "/:id",
            put(feedback::update_reply).delete(feedback::delete_reply),
        );

    Router::new()
        .route("/health", get(health_handler))
        .nest("/user", user_routes)
        .nest("/barangay", barangay_routes)
        .nest("/budgetCategory", category_routes)
        .nest("/budgetItem", item_routes)
        .nest("/project", project_routes)
        .nest("/feedback", feedback_routes)
        .nest("/feedbackReply", reply_routes)
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> Json<ApiResponse<()>> {
    respond("barangay API healthy", ())
}
