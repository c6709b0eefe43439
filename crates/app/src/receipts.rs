use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use metrics::counter;
use serde::Deserialize;
use uuid::Uuid;

use venbill_core::lifecycle::{next_status, TransitionAction};
use venbill_core::types::{DocumentStatus, Receipt, Role};
use venbill_storage::{NewReceipt, ReceiptError};

use crate::problem::ApiError;
use crate::refs;
use crate::response::ApiResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReceiptRequest {
    pub vendor_id: String,
    pub billing_note_ids: Vec<String>,
}

/// `POST /receipts`. A receipt references a non-empty set of APPROVED
/// billing notes from exactly one vendor.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateReceiptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.authenticate(&headers)?;
    actor.can_create_vendor_documents(&payload.vendor_id)?;

    let mut note_ids = payload.billing_note_ids.clone();
    note_ids.sort();
    note_ids.dedup();
    if note_ids.is_empty() {
        return Err(ApiError::validation(
            "a receipt requires at least one billing note",
        ));
    }

    let states = state
        .storage()
        .billing_notes()
        .fetch_states(&note_ids)
        .await
        .map_err(ApiError::storage)?;
    if states.len() != note_ids.len()
        || states.iter().any(|note| note.vendor_id != payload.vendor_id)
    {
        return Err(ApiError::not_found("billing note not found"));
    }
    if let Some(unapproved) = states.iter().find(|note| !note.status.is_approved()) {
        return Err(ApiError::conflict(format!(
            "billing note {} is not approved",
            unapproved.id
        )));
    }

    let now = state.now();
    let receipt = Receipt {
        id: Uuid::new_v4().to_string(),
        receipt_ref: refs::document_ref("RC", now),
        vendor_id: payload.vendor_id,
        billing_note_ids: note_ids,
        status: DocumentStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    let mut tx = state.storage().begin().await.map_err(ApiError::storage)?;
    state
        .storage()
        .receipts()
        .insert(
            &mut tx,
            &NewReceipt {
                id: receipt.id.clone(),
                receipt_ref: &receipt.receipt_ref,
                vendor_id: &receipt.vendor_id,
                billing_note_ids: &receipt.billing_note_ids,
                status: receipt.status,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .map_err(|err| match err {
            ReceiptError::DuplicateRef => {
                ApiError::conflict("a document with the same reference already exists")
            }
            ReceiptError::MissingReference => ApiError::not_found("billing note not found"),
            other => ApiError::storage(other),
        })?;
    tx.commit().await.map_err(ApiError::storage)?;

    counter!("documents_created_total", "kind" => "receipt").increment(1);
    Ok((StatusCode::CREATED, Json(ApiResponse::new(receipt))))
}

/// `GET /receipts`.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Receipt>>>, ApiError> {
    let actor = state.authenticate(&headers)?;

    let receipts = match (&actor.role, &actor.vendor_id) {
        (Role::Admin, _) => state
            .storage()
            .receipts()
            .list_all()
            .await
            .map_err(ApiError::storage)?,
        (_, Some(vendor_id)) => state
            .storage()
            .receipts()
            .list_for_vendor(vendor_id)
            .await
            .map_err(ApiError::storage)?,
        (_, None) => Vec::new(),
    };

    Ok(Json(ApiResponse::new(receipts)))
}

/// `GET /receipts/{id}`.
pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Receipt>>, ApiError> {
    let actor = state.authenticate(&headers)?;

    let receipt = state
        .storage()
        .receipts()
        .fetch(&id)
        .await
        .map_err(ApiError::storage)?
        .ok_or_else(|| ApiError::not_found("receipt not found"))?;
    actor.can_view_vendor(&receipt.vendor_id)?;

    Ok(Json(ApiResponse::new(receipt)))
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Receipt>>, ApiError> {
    transition(state, headers, id, TransitionAction::Approve).await
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Receipt>>, ApiError> {
    transition(state, headers, id, TransitionAction::Reject).await
}

async fn transition(
    state: AppState,
    headers: HeaderMap,
    id: String,
    action: TransitionAction,
) -> Result<Json<ApiResponse<Receipt>>, ApiError> {
    let actor = state.authenticate(&headers)?;
    let repo = state.storage().receipts();

    let receipt = repo
        .fetch(&id)
        .await
        .map_err(ApiError::storage)?
        .ok_or_else(|| ApiError::not_found("receipt not found"))?;
    actor.can_view_vendor(&receipt.vendor_id)?;

    if action.requires_admin() {
        actor.require_admin()?;
    } else {
        actor.can_create_vendor_documents(&receipt.vendor_id)?;
    }

    let next =
        next_status(receipt.status, action).map_err(|err| ApiError::conflict(err.to_string()))?;

    let now = state.now();
    let mut tx = state.storage().begin().await.map_err(ApiError::storage)?;
    repo.update_status(&mut tx, &receipt.id, receipt.status, next, now)
        .await
        .map_err(|err| match err {
            ReceiptError::StatusConflict => {
                ApiError::conflict("document status changed concurrently")
            }
            other => ApiError::storage(other),
        })?;
    tx.commit().await.map_err(ApiError::storage)?;

    counter!("document_transitions_total", "kind" => "receipt", "action" => action.as_str())
        .increment(1);

    Ok(Json(ApiResponse::new(Receipt {
        status: next,
        updated_at: now,
        ..receipt
    })))
}
