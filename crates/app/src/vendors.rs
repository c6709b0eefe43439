use std::str::FromStr;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use venbill_core::types::{PendingCounts, Role, Vendor};
use venbill_storage::NewVendor;

use crate::problem::ApiError;
use crate::response::ApiResponse;
use crate::router::AppState;

/// Vendor record enriched with its live pending document counts.
#[derive(Debug, Serialize)]
pub struct VendorWithCounts {
    #[serde(flatten)]
    pub vendor: Vendor,
    #[serde(flatten)]
    pub counts: PendingCounts,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVendorRequest {
    pub company_name: String,
    pub tax_id: String,
    #[serde(default)]
    pub vat_rate_text: Option<String>,
    #[serde(default)]
    pub vat_inclusive: Option<bool>,
}

/// `GET /vendors`. Admins see every vendor; vendor and user accounts see
/// their own vendor only.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<VendorWithCounts>>>, ApiError> {
    let actor = state.authenticate(&headers)?;

    let vendors = match (&actor.role, &actor.vendor_id) {
        (Role::Admin, _) => state
            .storage()
            .vendors()
            .list()
            .await
            .map_err(ApiError::storage)?,
        (_, Some(vendor_id)) => state
            .storage()
            .vendors()
            .fetch(vendor_id)
            .await
            .map_err(ApiError::storage)?
            .into_iter()
            .collect(),
        (_, None) => Vec::new(),
    };

    let mut enriched = Vec::with_capacity(vendors.len());
    for vendor in vendors {
        let counts = state
            .storage()
            .vendors()
            .pending_counts(&vendor.id)
            .await
            .map_err(ApiError::storage)?;
        enriched.push(VendorWithCounts { vendor, counts });
    }

    Ok(Json(ApiResponse::new(enriched)))
}

/// `GET /vendors/{id}`.
pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<VendorWithCounts>>, ApiError> {
    let actor = state.authenticate(&headers)?;
    actor.can_view_vendor(&id)?;

    let vendor = state
        .storage()
        .vendors()
        .fetch(&id)
        .await
        .map_err(ApiError::storage)?
        .ok_or_else(|| ApiError::not_found("vendor not found"))?;
    let counts = state
        .storage()
        .vendors()
        .pending_counts(&vendor.id)
        .await
        .map_err(ApiError::storage)?;

    Ok(Json(ApiResponse::new(VendorWithCounts { vendor, counts })))
}

/// `POST /vendors`. Admin-only.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateVendorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.authenticate(&headers)?;
    actor.require_admin()?;

    if payload.company_name.trim().is_empty() {
        return Err(ApiError::validation("company name must not be empty"));
    }
    if let Some(raw) = &payload.vat_rate_text {
        let rate = Decimal::from_str(raw.trim())
            .map_err(|_| ApiError::validation("vat rate must be a decimal number"))?;
        if rate.is_sign_negative() {
            return Err(ApiError::validation("vat rate must not be negative"));
        }
    }

    let now = state.now();
    let vendor = Vendor {
        id: Uuid::new_v4().to_string(),
        company_name: payload.company_name.trim().to_string(),
        tax_id: payload.tax_id.trim().to_string(),
        vat_rate_text: payload.vat_rate_text.map(|raw| raw.trim().to_string()),
        vat_inclusive: payload.vat_inclusive.unwrap_or(true),
        created_at: now,
        updated_at: now,
    };

    state
        .storage()
        .vendors()
        .insert(&NewVendor {
            id: vendor.id.clone(),
            company_name: &vendor.company_name,
            tax_id: &vendor.tax_id,
            vat_rate_text: vendor.vat_rate_text.clone(),
            vat_inclusive: vendor.vat_inclusive,
            created_at: now,
            updated_at: now,
        })
        .await
        .map_err(ApiError::storage)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(VendorWithCounts {
            vendor,
            counts: PendingCounts::default(),
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    use crate::router::app_router;
    use crate::testing;

    #[tokio::test]
    async fn vendor_fetching_other_vendor_gets_not_found() {
        let (state, _worker) = testing::setup_state().await;
        testing::seed_vendor(&state, "v-1").await;
        testing::seed_vendor(&state, "v-2").await;
        let vendor = testing::seed_user(
            &state,
            "vendor@venbill.test",
            Role::Vendor,
            Some("v-1"),
            "unused-hash",
        )
        .await;

        let response = app_router(state)
            .oneshot(testing::get("/vendors/v-2", &vendor.token))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn vendor_creation_is_admin_only() {
        let (state, _worker) = testing::setup_state().await;
        testing::seed_vendor(&state, "v-1").await;
        let vendor = testing::seed_user(
            &state,
            "vendor@venbill.test",
            Role::Vendor,
            Some("v-1"),
            "unused-hash",
        )
        .await;

        let response = app_router(state)
            .oneshot(testing::post_json(
                "/vendors",
                &vendor.token,
                serde_json::json!({"companyName": "New Co", "taxId": "T-1"}),
            ))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_creates_vendor_with_default_vat_config() {
        let (state, _worker) = testing::setup_state().await;
        let admin = testing::seed_admin(&state, "admin@venbill.test").await;

        let response = app_router(state)
            .oneshot(testing::post_json(
                "/vendors",
                &admin.token,
                serde_json::json!({"companyName": "New Co", "taxId": "T-1"}),
            ))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = testing::body_json(response).await;
        assert_eq!(body["data"]["vatInclusive"], true);
        assert_eq!(body["data"]["vatRateText"], serde_json::Value::Null);
        assert_eq!(body["data"]["pendingBillingCount"], 0);
    }

    #[tokio::test]
    async fn negative_vat_rate_is_rejected() {
        let (state, _worker) = testing::setup_state().await;
        let admin = testing::seed_admin(&state, "admin@venbill.test").await;

        let response = app_router(state)
            .oneshot(testing::post_json(
                "/vendors",
                &admin.token,
                serde_json::json!({"companyName": "New Co", "taxId": "T-1", "vatRateText": "-3"}),
            ))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn listing_includes_live_pending_counts() {
        let (state, _worker) = testing::setup_state().await;
        testing::seed_vendor(&state, "v-1").await;
        let vendor = testing::seed_user(
            &state,
            "vendor@venbill.test",
            Role::Vendor,
            Some("v-1"),
            "unused-hash",
        )
        .await;
        testing::seed_job(&state, "job-1", "v-1", &vendor.id).await;
        testing::seed_billing_note(
            &state,
            "bn-1",
            "v-1",
            "107",
            Some("7"),
            None,
            venbill_core::types::DocumentStatus::Pending,
            "job-1",
        )
        .await;

        let response = app_router(state)
            .oneshot(testing::get("/vendors", &vendor.token))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::OK);
        let body = testing::body_json(response).await;
        let listed = body["data"].as_array().expect("array");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["pendingBillingCount"], 1);
        assert_eq!(listed[0]["pendingReceiptCount"], 0);
    }
}
