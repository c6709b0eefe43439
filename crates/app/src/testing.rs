//! Shared fixtures for handler tests.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use uuid::Uuid;

use venbill_core::types::{DocumentStatus, Role, User};
use venbill_storage::{Database, NewBillingNote, NewJob, NewUser, NewVendor};
use venbill_util::{AppConfig, Environment};

use crate::router::AppState;
use crate::telemetry;

pub(crate) fn frozen_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".parse().expect("bind addr"),
        environment: Environment::Test,
        database_url: "sqlite::memory:?cache=shared".to_string(),
        auth_token_secret: b"test-secret".to_vec(),
        auth_token_ttl: Duration::from_secs(3600),
        backfill_interval: Duration::from_secs(60),
        backfill_batch_size: 50,
        bootstrap_admin: None,
    }
}

/// Builds an app state over a fresh in-memory store with a frozen clock.
///
/// The worker is returned alongside the state; tests keep it alive so the
/// backfill trigger channel stays open.
pub(crate) async fn setup_state() -> (AppState, crate::backfill::BackfillWorker) {
    let metrics = telemetry::init_metrics().expect("metrics init");
    let database = Database::connect("sqlite::memory:?cache=shared")
        .await
        .expect("connect");
    database.run_migrations().await.expect("migrations");

    let (state, worker) = AppState::new(metrics, database, &test_config());
    (state.with_clock(Arc::new(frozen_now)), worker)
}

/// A seeded account plus a valid bearer token for it.
pub(crate) struct SeededUser {
    pub id: String,
    pub token: String,
}

pub(crate) async fn seed_vendor(state: &AppState, id: &str) {
    seed_vendor_with_rate(state, id, Some("7"), true).await;
}

pub(crate) async fn seed_vendor_with_rate(
    state: &AppState,
    id: &str,
    vat_rate_text: Option<&str>,
    vat_inclusive: bool,
) {
    state
        .storage()
        .vendors()
        .insert(&NewVendor {
            id: id.to_string(),
            company_name: &format!("Vendor {id}"),
            tax_id: &format!("TAX-{id}"),
            vat_rate_text: vat_rate_text.map(str::to_string),
            vat_inclusive,
            created_at: frozen_now(),
            updated_at: frozen_now(),
        })
        .await
        .expect("seed vendor");
}

pub(crate) async fn seed_user(
    state: &AppState,
    email: &str,
    role: Role,
    vendor_id: Option<&str>,
    password_hash: &str,
) -> SeededUser {
    let id = Uuid::new_v4().to_string();
    state
        .storage()
        .users()
        .insert(&NewUser {
            id: id.clone(),
            email,
            name: "Test Account",
            password_hash,
            role,
            vendor_id: vendor_id.map(str::to_string),
            created_at: frozen_now(),
            updated_at: frozen_now(),
        })
        .await
        .expect("seed user");

    let user = User {
        id: id.clone(),
        email: email.to_string(),
        name: "Test Account".to_string(),
        password_hash: password_hash.to_string(),
        role,
        vendor_id: vendor_id.map(str::to_string),
        created_at: frozen_now(),
        updated_at: frozen_now(),
    };
    let token = state
        .sessions()
        .issue(&user, state.now())
        .expect("issue token");

    SeededUser { id, token }
}

pub(crate) async fn seed_admin(state: &AppState, email: &str) -> SeededUser {
    seed_user(state, email, Role::Admin, None, "unused-hash").await
}

pub(crate) async fn seed_job(state: &AppState, id: &str, vendor_id: &str, submitted_by: &str) {
    state
        .storage()
        .jobs()
        .insert(&NewJob {
            id: id.to_string(),
            vendor_id,
            title: "Delivery run",
            amount: Decimal::new(107, 0),
            submitted_by,
            created_at: frozen_now(),
        })
        .await
        .expect("seed job");
}

/// Inserts a billing note directly, bypassing the API. Used to seed rows
/// in arbitrary lifecycle states (and without a derived price, the way
/// imported legacy rows arrive).
#[allow(clippy::too_many_arguments)]
pub(crate) async fn seed_billing_note(
    state: &AppState,
    id: &str,
    vendor_id: &str,
    subtotal: &str,
    vat_rate_text: Option<&str>,
    price_before_vat: Option<&str>,
    status: DocumentStatus,
    job_id: &str,
) {
    use std::str::FromStr;

    let mut tx = state.storage().begin().await.expect("begin");
    state
        .storage()
        .billing_notes()
        .insert(
            &mut tx,
            &NewBillingNote {
                id: id.to_string(),
                billing_ref: &format!("BN-SEED-{id}"),
                vendor_id,
                job_ids: &[job_id.to_string()],
                subtotal: Decimal::from_str(subtotal).expect("subtotal"),
                vat_rate_text,
                price_before_vat: price_before_vat
                    .map(|raw| Decimal::from_str(raw).expect("price")),
                status,
                created_at: frozen_now(),
                updated_at: frozen_now(),
            },
        )
        .await
        .expect("seed billing note");
    tx.commit().await.expect("commit");
}

pub(crate) fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub(crate) fn post(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub(crate) fn post_json(uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub(crate) fn put_json(uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub(crate) fn delete(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub(crate) async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should read")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}
