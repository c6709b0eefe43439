use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use metrics::counter;
use serde::Deserialize;
use uuid::Uuid;

use venbill_core::types::PaymentVoucher;
use venbill_storage::{NewPaymentVoucher, PaymentVoucherError};

use crate::problem::ApiError;
use crate::refs;
use crate::response::ApiResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVoucherRequest {
    pub receipt_ids: Vec<String>,
}

/// `POST /payment-vouchers`. Admin-only; requires at least one APPROVED
/// receipt and never mutates the referenced receipts.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateVoucherRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.authenticate(&headers)?;
    actor.require_admin()?;

    let mut receipt_ids = payload.receipt_ids.clone();
    receipt_ids.sort();
    receipt_ids.dedup();
    if receipt_ids.is_empty() {
        return Err(ApiError::validation(
            "a payment voucher requires at least one receipt",
        ));
    }

    let states = state
        .storage()
        .receipts()
        .fetch_states(&receipt_ids)
        .await
        .map_err(ApiError::storage)?;
    if states.len() != receipt_ids.len() {
        return Err(ApiError::not_found("receipt not found"));
    }
    if let Some(unapproved) = states.iter().find(|receipt| !receipt.status.is_approved()) {
        return Err(ApiError::conflict(format!(
            "receipt {} is not approved",
            unapproved.id
        )));
    }

    let now = state.now();
    let voucher = PaymentVoucher {
        id: Uuid::new_v4().to_string(),
        voucher_ref: refs::document_ref("PV", now),
        receipt_ids,
        issued_by: actor.user_id,
        issued_at: now,
    };

    let mut tx = state.storage().begin().await.map_err(ApiError::storage)?;
    state
        .storage()
        .payment_vouchers()
        .insert(
            &mut tx,
            &NewPaymentVoucher {
                id: voucher.id.clone(),
                voucher_ref: &voucher.voucher_ref,
                receipt_ids: &voucher.receipt_ids,
                issued_by: &voucher.issued_by,
                issued_at: now,
            },
        )
        .await
        .map_err(|err| match err {
            PaymentVoucherError::DuplicateRef => {
                ApiError::conflict("a document with the same reference already exists")
            }
            PaymentVoucherError::MissingReference => ApiError::not_found("receipt not found"),
            other => ApiError::storage(other),
        })?;
    tx.commit().await.map_err(ApiError::storage)?;

    counter!("documents_created_total", "kind" => "payment_voucher").increment(1);
    Ok((StatusCode::CREATED, Json(ApiResponse::new(voucher))))
}

/// `GET /payment-vouchers`. Settlement records are an admin surface.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<PaymentVoucher>>>, ApiError> {
    let actor = state.authenticate(&headers)?;
    actor.require_admin()?;

    let vouchers = state
        .storage()
        .payment_vouchers()
        .list()
        .await
        .map_err(ApiError::storage)?;
    Ok(Json(ApiResponse::new(vouchers)))
}
