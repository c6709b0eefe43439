mod auth;
mod backfill;
mod billing;
mod jobs;
mod problem;
mod receipts;
mod refs;
mod response;
mod router;
mod session;
mod telemetry;
#[cfg(test)]
mod testing;
mod users;
mod vendors;
mod vouchers;

use std::net::SocketAddr;

use chrono::Utc;
use tracing::info;
use venbill_storage::Database;
use venbill_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    auth::ensure_bootstrap_admin(&database, &config, Utc::now()).await?;

    let (state, backfill_worker) = router::AppState::new(metrics, database, &config);
    backfill_worker.spawn();

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
