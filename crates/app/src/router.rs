use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use venbill_core::access::{capabilities_for, Actor, Capability};
use venbill_core::money;
use venbill_core::types::Role;
use venbill_storage::Database;
use venbill_util::AppConfig;

use crate::backfill::{BackfillService, BackfillWorker};
use crate::problem::ApiError;
use crate::response::ApiResponse;
use crate::session::SessionKeys;
use crate::{auth, backfill, billing, jobs, receipts, telemetry, users, vendors, vouchers};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    sessions: Arc<SessionKeys>,
    backfill: BackfillService,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        config: &AppConfig,
    ) -> (Self, BackfillWorker) {
        let clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> = Arc::new(Utc::now);
        let sessions = Arc::new(SessionKeys::new(
            &config.auth_token_secret,
            config.auth_token_ttl,
        ));
        let (backfill, worker) = BackfillService::new(
            storage.clone(),
            clock.clone(),
            config.backfill_interval,
            config.backfill_batch_size,
        );
        (
            Self {
                metrics,
                storage,
                clock,
                sessions,
                backfill,
            },
            worker,
        )
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn sessions(&self) -> &SessionKeys {
        &self.sessions
    }

    pub fn backfill(&self) -> &BackfillService {
        &self.backfill
    }

    /// Builds the per-request actor from the `Authorization` header.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Actor, ApiError> {
        Ok(self.sessions.authenticate(headers, self.now())?)
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/settings", get(settings))
        .route("/auth/login", post(auth::login))
        .route("/users", get(users::list).post(users::create))
        .route("/users/:id", put(users::update).delete(users::remove))
        .route("/vendors", get(vendors::list).post(vendors::create))
        .route("/vendors/:id", get(vendors::fetch))
        .route("/jobs", get(jobs::list).post(jobs::create))
        .route("/billing-notes", get(billing::list).post(billing::create))
        .route("/billing-notes/:id", get(billing::fetch))
        .route("/billing-notes/:id/submit", post(billing::submit))
        .route("/billing-notes/:id/approve", post(billing::approve))
        .route("/billing-notes/:id/reject", post(billing::reject))
        .route("/billing-notes/:id/void", post(billing::void))
        .route("/receipts", get(receipts::list).post(receipts::create))
        .route("/receipts/:id", get(receipts::fetch))
        .route("/receipts/:id/approve", post(receipts::approve))
        .route("/receipts/:id/reject", post(receipts::reject))
        .route(
            "/payment-vouchers",
            get(vouchers::list).post(vouchers::create),
        )
        .route("/admin/backfill", post(backfill::trigger))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}

/// Reference data consumed by the UI: role names, the default VAT rate and
/// the capabilities enabled for the calling actor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsData {
    roles: Vec<&'static str>,
    default_vat_rate: String,
    capabilities: Vec<Capability>,
}

async fn settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<SettingsData>>, ApiError> {
    let actor = state.authenticate(&headers)?;
    let data = SettingsData {
        roles: Role::all().iter().map(|role| role.as_str()).collect(),
        default_vat_rate: money::default_vat_rate().to_string(),
        capabilities: capabilities_for(actor.role, actor.vendor_id.is_some()),
    };
    Ok(Json(ApiResponse::new(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::testing;

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (state, _worker) = testing::setup_state().await;
        let app = app_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let (state, _worker) = testing::setup_state().await;
        let app = app_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn settings_requires_a_session() {
        let (state, _worker) = testing::setup_state().await;
        let app = app_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/settings")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn settings_lists_roles_and_capabilities() {
        let (state, _worker) = testing::setup_state().await;
        let admin = testing::seed_admin(&state, "admin@venbill.test").await;

        let response = app_router(state)
            .oneshot(testing::get("/settings", &admin.token))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let body = testing::body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(
            body["data"]["roles"],
            serde_json::json!(["ADMIN", "VENDOR", "USER"])
        );
        assert_eq!(body["data"]["defaultVatRate"], "7");
        let capabilities = body["data"]["capabilities"]
            .as_array()
            .expect("capabilities array");
        assert!(capabilities.contains(&serde_json::json!("review_documents")));
    }
}
