use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use venbill_core::types::{Role, User};
use venbill_storage::{NewUser, UserError, UserUpdate};

use crate::problem::ApiError;
use crate::response::ApiResponse;
use crate::router::AppState;
use crate::session;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub vendor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub vendor_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteData {
    pub deleted: bool,
}

/// `GET /users`. Admins see every account, vendors the accounts of their
/// own vendor.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<User>>>, ApiError> {
    let actor = state.authenticate(&headers)?;
    actor.can_list_users()?;

    let users = match (&actor.role, &actor.vendor_id) {
        (Role::Admin, _) => state
            .storage()
            .users()
            .list_all()
            .await
            .map_err(ApiError::storage)?,
        (_, Some(vendor_id)) => state
            .storage()
            .users()
            .list_for_vendor(vendor_id)
            .await
            .map_err(ApiError::storage)?,
        (_, None) => Vec::new(),
    };

    Ok(Json(ApiResponse::new(users)))
}

/// `POST /users`.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.authenticate(&headers)?;
    actor.can_manage_user(payload.role, payload.vendor_id.as_deref())?;

    if payload.email.trim().is_empty() || !payload.email.contains('@') {
        return Err(ApiError::validation("a valid email address is required"));
    }
    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("name must not be empty"));
    }
    if payload.password.len() < 8 {
        return Err(ApiError::validation(
            "password must be at least 8 characters",
        ));
    }

    let password_hash = session::hash_password(&payload.password)?;
    let now = state.now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        email: payload.email.trim().to_string(),
        name: payload.name.trim().to_string(),
        password_hash,
        role: payload.role,
        vendor_id: payload.vendor_id,
        created_at: now,
        updated_at: now,
    };

    state
        .storage()
        .users()
        .insert(&NewUser {
            id: user.id.clone(),
            email: &user.email,
            name: &user.name,
            password_hash: &user.password_hash,
            role: user.role,
            vendor_id: user.vendor_id.clone(),
            created_at: now,
            updated_at: now,
        })
        .await
        .map_err(map_user_error)?;

    Ok((StatusCode::CREATED, Json(ApiResponse::new(user))))
}

/// `PUT /users/{id}`.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<ApiResponse<User>>, ApiError> {
    let actor = state.authenticate(&headers)?;

    let target = state
        .storage()
        .users()
        .fetch(&id)
        .await
        .map_err(ApiError::storage)?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    // The visibility check runs against the target as stored, so an
    // out-of-scope account surfaces as missing rather than forbidden.
    actor.can_manage_user(target.role, target.vendor_id.as_deref())?;

    let role = payload.role.unwrap_or(target.role);
    let vendor_id = payload.vendor_id.clone().or_else(|| target.vendor_id.clone());
    if payload.role.is_some() || payload.vendor_id.is_some() {
        actor.can_manage_user(role, vendor_id.as_deref())?;
    }

    let email = payload.email.unwrap_or_else(|| target.email.clone());
    if email.trim().is_empty() || !email.contains('@') {
        return Err(ApiError::validation("a valid email address is required"));
    }
    let name = payload.name.unwrap_or_else(|| target.name.clone());
    if name.trim().is_empty() {
        return Err(ApiError::validation("name must not be empty"));
    }

    let password_hash = match &payload.password {
        Some(password) if password.len() < 8 => {
            return Err(ApiError::validation(
                "password must be at least 8 characters",
            ));
        }
        Some(password) => session::hash_password(password)?,
        None => target.password_hash.clone(),
    };

    let now = state.now();
    state
        .storage()
        .users()
        .update(&UserUpdate {
            id: &target.id,
            email: email.trim(),
            name: name.trim(),
            password_hash: &password_hash,
            role,
            vendor_id: vendor_id.clone(),
            updated_at: now,
        })
        .await
        .map_err(map_user_error)?;

    Ok(Json(ApiResponse::new(User {
        id: target.id,
        email: email.trim().to_string(),
        name: name.trim().to_string(),
        password_hash,
        role,
        vendor_id,
        created_at: target.created_at,
        updated_at: now,
    })))
}

/// `DELETE /users/{id}`. Admin-only; ADMIN accounts are never deleted.
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<DeleteData>>, ApiError> {
    let actor = state.authenticate(&headers)?;
    actor.can_delete_users()?;

    let target = state
        .storage()
        .users()
        .fetch(&id)
        .await
        .map_err(ApiError::storage)?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    if target.role.is_admin() {
        return Err(ApiError::conflict("ADMIN accounts cannot be deleted"));
    }

    let deleted = state
        .storage()
        .users()
        .delete(&target.id)
        .await
        .map_err(ApiError::storage)?;
    if !deleted {
        return Err(ApiError::not_found("user not found"));
    }

    Ok(Json(ApiResponse::new(DeleteData { deleted })))
}

fn map_user_error(err: UserError) -> ApiError {
    match err {
        UserError::DuplicateEmail => {
            ApiError::conflict("a user with the same email already exists")
        }
        UserError::MissingVendor => ApiError::validation("referenced vendor does not exist"),
        other => ApiError::storage(other),
    }
}
