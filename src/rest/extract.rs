//! Request extractors that reject with the JSON error envelope.
//!
//! Identity resolution runs before any body parsing, so an anonymous request
//! to a protected route never reaches a handler or the store.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::debug;

use super::AppState;
use crate::auth::{Identity, SessionState, SESSION_COOKIE};
use crate::error::AppError;
use crate::ids::Id;
use crate::models::{Filter, Status};
use crate::storage::Pagination;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            debug!(path = %parts.uri.path(), "no session cookie");
            return Err(AppError::Unauthorized);
        };

        match state.sessions.resolve(cookie.value())? {
            SessionState::Authenticated(identity) => Ok(identity),
            SessionState::Anonymous => Err(AppError::Unauthorized),
        }
    }
}

/// Role gate; denials look the same as a missing session.
pub fn require_admin(identity: &Identity) -> Result<(), AppError> {
    if identity.is_admin() {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// `Json` whose rejection is a 400 with the `error` envelope.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
        Ok(Self(value))
    }
}

pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// The single `:id`-style path segment, validated into an [`Id`].
pub struct PathId(pub Id);

#[async_trait]
impl<S> FromRequestParts<S> for PathId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
        raw.parse()
            .map(PathId)
            .map_err(|e: crate::ids::IdError| AppError::BadRequest(e.to_string()))
    }
}

/// `?page=&limit=&filter=` on list endpoints.
#[derive(Deserialize, Debug, Default)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub filter: Option<String>,
}

impl ListQuery {
    pub fn window(&self) -> Pagination {
        Pagination::new(self.page, self.limit)
    }

    pub fn status_filter<S: Status>(&self) -> Result<Filter<S>, AppError> {
        Filter::parse(self.filter.as_deref()).map_err(AppError::BadRequest)
    }
}
