use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use metrics::counter;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use venbill_core::types::{Job, Role};
use venbill_storage::{JobError, NewJob};

use crate::problem::ApiError;
use crate::response::ApiResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub vendor_id: String,
    pub title: String,
    pub amount: Decimal,
}

/// `GET /jobs`. Admins see every job; vendor and user accounts their own
/// vendor's jobs.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Job>>>, ApiError> {
    let actor = state.authenticate(&headers)?;

    let jobs = match (&actor.role, &actor.vendor_id) {
        (Role::Admin, _) => state
            .storage()
            .jobs()
            .list_all()
            .await
            .map_err(ApiError::storage)?,
        (_, Some(vendor_id)) => state
            .storage()
            .jobs()
            .list_for_vendor(vendor_id)
            .await
            .map_err(ApiError::storage)?,
        (_, None) => Vec::new(),
    };

    Ok(Json(ApiResponse::new(jobs)))
}

/// `POST /jobs`. Vendors submit work for their own vendor.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.authenticate(&headers)?;
    actor.can_create_vendor_documents(&payload.vendor_id)?;

    if payload.title.trim().is_empty() {
        return Err(ApiError::validation("title must not be empty"));
    }
    if payload.amount.is_sign_negative() {
        return Err(ApiError::validation("amount must not be negative"));
    }

    let now = state.now();
    let job = Job {
        id: Uuid::new_v4().to_string(),
        vendor_id: payload.vendor_id,
        title: payload.title.trim().to_string(),
        amount: payload.amount,
        submitted_by: actor.user_id,
        created_at: now,
    };

    state
        .storage()
        .jobs()
        .insert(&NewJob {
            id: job.id.clone(),
            vendor_id: &job.vendor_id,
            title: &job.title,
            amount: job.amount,
            submitted_by: &job.submitted_by,
            created_at: now,
        })
        .await
        .map_err(|err| match err {
            JobError::MissingReference => ApiError::validation("referenced vendor does not exist"),
            other => ApiError::storage(other),
        })?;

    counter!("documents_created_total", "kind" => "job").increment(1);
    Ok((StatusCode::CREATED, Json(ApiResponse::new(job))))
}
