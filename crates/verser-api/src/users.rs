use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;

use verser_db::models::NewUser;
use verser_db::{UsernameTaken, with_storage};
use verser_types::api::RegisterRequest;
use verser_types::models::User;

use crate::AppState;
use crate::error::ApiError;

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::BadRequest(
            "username must be 3 to 32 characters".into(),
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }

    let username = req.username.clone();
    if with_storage(&state.storage, move |s| s.get_user_by_username(&username))
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("Username already taken"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let new_user = NewUser {
        display_name: req.display_name.unwrap_or_else(|| req.username.clone()),
        username: req.username,
        email: req.email,
        password: password_hash,
        avatar: req.avatar,
    };
    let record = with_storage(&state.storage, move |s| s.create_user(new_user))
        .await
        .map_err(|e| {
            if e.is::<UsernameTaken>() {
                ApiError::Conflict("Username already taken")
            } else {
                ApiError::Internal(e)
            }
        })?;

    info!("Registered user {} ({})", record.username, record.id);
    Ok((StatusCode::CREATED, Json(User::from(record))))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    let record = with_storage(&state.storage, move |s| s.get_user(user_id))
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(record.into_public()))
}

pub async fn user_communities(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let communities =
        with_storage(&state.storage, move |s| s.list_communities_for_user(user_id)).await?;
    Ok(Json(communities))
}
