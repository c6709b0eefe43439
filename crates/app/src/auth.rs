use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use venbill_core::types::{Role, User};
use venbill_storage::{Database, NewUser};
use venbill_util::AppConfig;

use crate::problem::ApiError;
use crate::response::ApiResponse;
use crate::router::AppState;
use crate::session;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginData {
    pub token: String,
    pub user: User,
}

/// `POST /auth/login`. Unknown email and wrong password produce the same
/// response so accounts cannot be enumerated.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginData>>, ApiError> {
    let user = state
        .storage()
        .users()
        .fetch_by_email(&payload.email)
        .await
        .map_err(ApiError::storage)?;

    let Some(user) = user else {
        counter!("login_attempts_total", "result" => "failure").increment(1);
        return Err(ApiError::Unauthorized("invalid credentials".to_string()));
    };

    if !session::verify_password(&payload.password, &user.password_hash)? {
        counter!("login_attempts_total", "result" => "failure").increment(1);
        return Err(ApiError::Unauthorized("invalid credentials".to_string()));
    }

    let token = state.sessions().issue(&user, state.now())?;
    counter!("login_attempts_total", "result" => "success").increment(1);
    Ok(Json(ApiResponse::new(LoginData { token, user })))
}

/// Provisions the configured ADMIN account when the user table is empty.
///
/// Replaces the original seed script with explicit startup provisioning;
/// an already-populated store is never touched.
pub async fn ensure_bootstrap_admin(
    database: &Database,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(bootstrap) = &config.bootstrap_admin else {
        return Ok(());
    };

    if database.users().count().await? > 0 {
        return Ok(());
    }

    let password_hash = session::hash_password(&bootstrap.password)?;
    database
        .users()
        .insert(&NewUser {
            id: Uuid::new_v4().to_string(),
            email: &bootstrap.email,
            name: "Administrator",
            password_hash: &password_hash,
            role: Role::Admin,
            vendor_id: None,
            created_at: now,
            updated_at: now,
        })
        .await?;

    info!(stage = "bootstrap", email = %bootstrap.email, "provisioned initial admin account");
    Ok(())
}
