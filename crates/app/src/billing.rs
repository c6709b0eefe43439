use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use metrics::counter;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use venbill_core::lifecycle::{next_status, TransitionAction};
use venbill_core::money;
use venbill_core::types::{BillingNote, DocumentStatus, Role};
use venbill_storage::{BillingNoteError, NewBillingNote};

use crate::problem::ApiError;
use crate::refs;
use crate::response::ApiResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBillingNoteRequest {
    pub vendor_id: String,
    pub job_ids: Vec<String>,
    pub subtotal: Decimal,
    #[serde(default)]
    pub vat_rate_text: Option<String>,
    #[serde(default)]
    pub status: Option<CreateStatus>,
}

/// Statuses a billing note may be created in. Review states are only
/// reachable through transitions.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateStatus {
    Draft,
    Pending,
}

/// `POST /billing-notes`. Creates a note from jobs belonging to the
/// vendor; the pre-tax price is derived immediately since both monetary
/// inputs are known.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBillingNoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.authenticate(&headers)?;
    actor.can_create_vendor_documents(&payload.vendor_id)?;

    let mut job_ids = payload.job_ids.clone();
    job_ids.sort();
    job_ids.dedup();
    if job_ids.is_empty() {
        return Err(ApiError::validation(
            "a billing note requires at least one job",
        ));
    }

    let vendor = state
        .storage()
        .vendors()
        .fetch(&payload.vendor_id)
        .await
        .map_err(ApiError::storage)?
        .ok_or_else(|| ApiError::not_found("vendor not found"))?;

    let jobs = state
        .storage()
        .jobs()
        .fetch_many(&job_ids)
        .await
        .map_err(ApiError::storage)?;
    if jobs.len() != job_ids.len() || jobs.iter().any(|job| job.vendor_id != vendor.id) {
        // Missing jobs and jobs of other vendors are indistinguishable.
        return Err(ApiError::not_found("job not found"));
    }

    let vat_rate_text = payload
        .vat_rate_text
        .clone()
        .or_else(|| vendor.vat_rate_text.clone());
    let price_before_vat = money::derive_price_before_vat(
        payload.subtotal,
        vat_rate_text.as_deref(),
        vendor.vat_inclusive,
    )
    .map_err(|err| ApiError::validation(err.to_string()))?;

    let status = match payload.status {
        Some(CreateStatus::Draft) => DocumentStatus::Draft,
        Some(CreateStatus::Pending) | None => DocumentStatus::Pending,
    };

    let now = state.now();
    let note = BillingNote {
        id: Uuid::new_v4().to_string(),
        billing_ref: refs::document_ref("BN", now),
        vendor_id: vendor.id,
        job_ids,
        subtotal: payload.subtotal,
        vat_rate_text,
        price_before_vat: Some(price_before_vat),
        status,
        created_at: now,
        updated_at: now,
    };

    let mut tx = state.storage().begin().await.map_err(ApiError::storage)?;
    state
        .storage()
        .billing_notes()
        .insert(
            &mut tx,
            &NewBillingNote {
                id: note.id.clone(),
                billing_ref: &note.billing_ref,
                vendor_id: &note.vendor_id,
                job_ids: &note.job_ids,
                subtotal: note.subtotal,
                vat_rate_text: note.vat_rate_text.as_deref(),
                price_before_vat: note.price_before_vat,
                status: note.status,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .map_err(|err| match err {
            BillingNoteError::DuplicateRef => {
                ApiError::conflict("a document with the same reference already exists")
            }
            BillingNoteError::MissingReference => ApiError::not_found("job not found"),
            other => ApiError::storage(other),
        })?;
    tx.commit().await.map_err(ApiError::storage)?;

    counter!("documents_created_total", "kind" => "billing_note").increment(1);
    Ok((StatusCode::CREATED, Json(ApiResponse::new(note))))
}

/// `GET /billing-notes`.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<BillingNote>>>, ApiError> {
    let actor = state.authenticate(&headers)?;

    let notes = match (&actor.role, &actor.vendor_id) {
        (Role::Admin, _) => state
            .storage()
            .billing_notes()
            .list_all()
            .await
            .map_err(ApiError::storage)?,
        (_, Some(vendor_id)) => state
            .storage()
            .billing_notes()
            .list_for_vendor(vendor_id)
            .await
            .map_err(ApiError::storage)?,
        (_, None) => Vec::new(),
    };

    Ok(Json(ApiResponse::new(notes)))
}

/// `GET /billing-notes/{id}`.
pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<BillingNote>>, ApiError> {
    let actor = state.authenticate(&headers)?;

    let note = state
        .storage()
        .billing_notes()
        .fetch(&id)
        .await
        .map_err(ApiError::storage)?
        .ok_or_else(|| ApiError::not_found("billing note not found"))?;
    actor.can_view_vendor(&note.vendor_id)?;

    Ok(Json(ApiResponse::new(note)))
}

pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<BillingNote>>, ApiError> {
    transition(state, headers, id, TransitionAction::Submit).await
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<BillingNote>>, ApiError> {
    transition(state, headers, id, TransitionAction::Approve).await
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<BillingNote>>, ApiError> {
    transition(state, headers, id, TransitionAction::Reject).await
}

pub async fn void(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<BillingNote>>, ApiError> {
    transition(state, headers, id, TransitionAction::Void).await
}

/// Applies a lifecycle transition: visibility first (out-of-scope notes
/// surface as missing), then the role gate, then the validated transition
/// as a compare-and-set against the status it was validated for.
async fn transition(
    state: AppState,
    headers: HeaderMap,
    id: String,
    action: TransitionAction,
) -> Result<Json<ApiResponse<BillingNote>>, ApiError> {
    let actor = state.authenticate(&headers)?;
    let repo = state.storage().billing_notes();

    let note = repo
        .fetch(&id)
        .await
        .map_err(ApiError::storage)?
        .ok_or_else(|| ApiError::not_found("billing note not found"))?;
    actor.can_view_vendor(&note.vendor_id)?;

    if action.requires_admin() {
        actor.require_admin()?;
    } else {
        actor.can_create_vendor_documents(&note.vendor_id)?;
    }

    let next = next_status(note.status, action).map_err(|err| ApiError::conflict(err.to_string()))?;

    let now = state.now();
    let mut tx = state.storage().begin().await.map_err(ApiError::storage)?;
    repo.update_status(&mut tx, &note.id, note.status, next, now)
        .await
        .map_err(|err| match err {
            BillingNoteError::StatusConflict => {
                ApiError::conflict("document status changed concurrently")
            }
            other => ApiError::storage(other),
        })?;
    tx.commit().await.map_err(ApiError::storage)?;

    counter!("document_transitions_total", "kind" => "billing_note", "action" => action.as_str())
        .increment(1);

    Ok(Json(ApiResponse::new(BillingNote {
        status: next,
        updated_at: now,
        ..note
    })))
}
