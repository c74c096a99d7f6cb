//! Registration, login/logout and the caller's own profile.

use std::sync::Arc;

use axum::{extract::State, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use tracing::info;

use super::extract::ApiJson;
use super::{respond, ApiResponse, ApiResult, AppState};
use crate::auth::{hash_password, verify_password, Identity, SESSION_COOKIE};
use crate::error::AppError;
use crate::ids::Id;
use crate::models::{NewUser, ProfileChanges, Role, UserProfile};
use crate::storage::StorageError;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub role: Option<Role>,
    pub contact_number: Option<String>,
    pub barangay_id: Id,
}

impl RegisterRequest {
    fn validate(&self) -> Result<(), String> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err("email is required".to_string());
        }
        if !email.contains('@') {
            return Err("email is not a valid address".to_string());
        }
        validate_password(&self.password)?;
        if self.first_name.trim().is_empty() {
            return Err("first_name is required".to_string());
        }
        if self.last_name.trim().is_empty() {
            return Err("last_name is required".to_string());
        }
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("password is required".to_string());
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!("password must be at least {MIN_PASSWORD_LEN} characters"));
    }
    Ok(())
}

// bcrypt work runs on the blocking pool.
async fn hash_blocking(password: String, cost: u32) -> Result<String, AppError> {
    Ok(tokio::task::spawn_blocking(move || hash_password(&password, cost)).await??)
}

async fn verify_blocking(password: String, hash: String) -> Result<bool, AppError> {
    Ok(tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await??)
}

/// Anyone may register as a resident. Registering an admin takes an admin
/// session of the same barangay.
pub async fn register(
    State(state): State<Arc<AppState>>,
    session: Option<Identity>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> ApiResult<UserProfile> {
    payload.validate().map_err(AppError::BadRequest)?;

    let role = payload.role.unwrap_or(Role::Resident);
    if role == Role::Admin {
        match &session {
            Some(admin) if admin.is_admin() && admin.barangay_id == payload.barangay_id => {}
            _ => return Err(AppError::Unauthorized),
        }
    }
    if state.storage.get_barangay(payload.barangay_id)?.is_none() {
        return Err(AppError::BadRequest(format!(
            "barangay {} does not exist",
            payload.barangay_id
        )));
    }

    let password_hash = hash_blocking(payload.password, state.bcrypt_cost).await?;
    let user = state.storage.create_user(NewUser {
        email: payload.email,
        password_hash,
        first_name: payload.first_name,
        last_name: payload.last_name,
        role,
        contact_number: payload.contact_number,
        barangay_id: payload.barangay_id,
    })?;

    info!(user_id = %user.id, role = ?user.role, barangay_id = %user.barangay_id, "user registered");
    Ok(respond("User registered", UserProfile::from(&user)))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<(CookieJar, Json<ApiResponse<UserProfile>>), AppError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::BadRequest("email and password are required".to_string()));
    }

    let Some(user) = state.storage.find_user_by_email(&payload.email)? else {
        return Err(AppError::Unauthorized);
    };
    if !verify_blocking(payload.password, user.password_hash.clone()).await? {
        return Err(AppError::Unauthorized);
    }

    let barangay = state
        .storage
        .get_barangay(user.barangay_id)?
        .ok_or(StorageError::NotFound("barangay"))?;
    let identity = Identity {
        user_id: user.id,
        role: user.role,
        barangay_id: barangay.id,
        barangay_name: barangay.name,
    };
    let existing = jar.get(SESSION_COOKIE).map(|cookie| cookie.value());
    let token = state.sessions.login(existing, identity)?;

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.cookie_secure)
        .max_age(time::Duration::seconds(state.sessions.ttl().num_seconds()))
        .build();

    info!(user_id = %user.id, "user logged in");
    Ok((jar.add(cookie), respond("Login successful", UserProfile::from(&user))))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiResponse<()>>), AppError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.logout(cookie.value())?;
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((jar, respond("Logged out", ())))
}

pub async fn me(State(state): State<Arc<AppState>>, identity: Identity) -> ApiResult<UserProfile> {
    let user = state
        .storage
        .get_user(identity.user_id)?
        .ok_or(StorageError::NotFound("user"))?;
    Ok(respond("Current user", UserProfile::from(&user)))
}

pub async fn update_me(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    ApiJson(changes): ApiJson<ProfileChanges>,
) -> ApiResult<UserProfile> {
    changes.validate().map_err(AppError::BadRequest)?;
    let user = state.storage.update_profile(identity.user_id, &changes)?;
    Ok(respond("Profile updated", UserProfile::from(&user)))
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    ApiJson(payload): ApiJson<PasswordChange>,
) -> ApiResult<()> {
    validate_password(&payload.new_password).map_err(AppError::BadRequest)?;
    let user = state
        .storage
        .get_user(identity.user_id)?
        .ok_or(StorageError::NotFound("user"))?;
    if !verify_blocking(payload.current_password, user.password_hash).await? {
        return Err(AppError::BadRequest("current password is incorrect".to_string()));
    }

    let password_hash = hash_blocking(payload.new_password, state.bcrypt_cost).await?;
    state.storage.set_password_hash(user.id, &password_hash)?;
    info!(user_id = %user.id, "password changed");
    Ok(respond("Password changed", ()))
}
