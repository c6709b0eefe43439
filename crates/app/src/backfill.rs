use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use tokio::{
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};
use tracing::{error, info, warn};

use venbill_core::money;
use venbill_storage::{BillingNoteError, Database, PriceWriteOutcome};

use crate::problem::ApiError;
use crate::response::ApiResponse;
use crate::router::AppState;

/// Handle used to request an immediate backfill run.
#[derive(Clone)]
pub struct BackfillService {
    sender: mpsc::Sender<BackfillCommand>,
}

impl BackfillService {
    pub fn new(
        database: Database,
        clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
        interval: Duration,
        batch_size: u32,
    ) -> (Self, BackfillWorker) {
        let (sender, receiver) = mpsc::channel(8);
        let worker = BackfillWorker {
            database,
            clock,
            receiver,
            interval,
            batch_size,
        };
        (Self { sender }, worker)
    }

    pub async fn trigger(&self) -> Result<(), BackfillTriggerError> {
        self.sender
            .send(BackfillCommand::Run)
            .await
            .map_err(|_| BackfillTriggerError::ChannelClosed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackfillTriggerError {
    #[error("backfill worker channel closed")]
    ChannelClosed,
}

enum BackfillCommand {
    Run,
}

/// Worker deriving missing `price_before_vat` values from stored
/// subtotals.
///
/// Runs on a periodic ticker and on explicit triggers. Safe to run
/// concurrently with normal traffic: it only ever writes rows whose
/// derived price is still unset.
pub struct BackfillWorker {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    receiver: mpsc::Receiver<BackfillCommand>,
    interval: Duration,
    batch_size: u32,
}

impl BackfillWorker {
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(mut self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        error!(stage = "backfill", error = %err, "periodic backfill run failed");
                    }
                }
                command = self.receiver.recv() => {
                    match command {
                        Some(BackfillCommand::Run) => {
                            if let Err(err) = self.run_once().await {
                                error!(stage = "backfill", error = %err, "triggered backfill run failed");
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    /// Scans billing notes without a derived price and fills them in.
    ///
    /// Idempotent and resumable: the guarded write never overwrites a set
    /// value, so re-runs only touch rows that are still unpriced. Rows
    /// with invalid monetary input are skipped and counted, never coerced.
    /// A persistence failure halts the run after logging the last
    /// successfully processed note.
    pub async fn run_once(&mut self) -> Result<BackfillSummary, BackfillRunError> {
        let mut summary = BackfillSummary::default();
        let mut cursor = 0i64;
        let mut last_processed: Option<String> = None;

        loop {
            let batch = self
                .database
                .billing_notes()
                .list_unpriced(cursor, self.batch_size)
                .await
                .map_err(|err| halt(err, &last_processed))?;
            if batch.is_empty() {
                break;
            }

            for note in &batch {
                cursor = note.rowid;

                let subtotal = match Decimal::from_str(&note.subtotal) {
                    Ok(value) => value,
                    Err(_) => {
                        warn!(stage = "backfill", note = %note.id, "skipping note with unparseable subtotal");
                        summary.skipped += 1;
                        counter!("backfill_skipped_total").increment(1);
                        continue;
                    }
                };

                let price = match money::derive_price_before_vat(
                    subtotal,
                    note.vat_rate_text.as_deref(),
                    note.vat_inclusive != 0,
                ) {
                    Ok(price) => price,
                    Err(err) => {
                        warn!(stage = "backfill", note = %note.id, error = %err, "skipping note with invalid monetary input");
                        summary.skipped += 1;
                        counter!("backfill_skipped_total").increment(1);
                        continue;
                    }
                };

                match self
                    .database
                    .billing_notes()
                    .set_price_before_vat(&note.id, price, self.now())
                    .await
                {
                    Ok(PriceWriteOutcome::Updated) => {
                        summary.processed += 1;
                        last_processed = Some(note.id.clone());
                        counter!("backfill_processed_total").increment(1);
                    }
                    Ok(PriceWriteOutcome::AlreadySet) => {
                        summary.already_set += 1;
                    }
                    Err(err) => return Err(halt(err, &last_processed)),
                }
            }

            if (batch.len() as u32) < self.batch_size {
                break;
            }
        }

        info!(
            stage = "backfill",
            processed = summary.processed,
            skipped = summary.skipped,
            already_set = summary.already_set,
            "price backfill run complete"
        );
        Ok(summary)
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

fn halt(err: BillingNoteError, last_processed: &Option<String>) -> BackfillRunError {
    error!(
        stage = "backfill",
        error = %err,
        last_processed = last_processed.as_deref().unwrap_or("none"),
        "halting backfill batch"
    );
    BackfillRunError::Database(err)
}

/// Outcome counts of a single backfill run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillSummary {
    pub processed: u64,
    pub skipped: u64,
    pub already_set: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum BackfillRunError {
    #[error("database error: {0}")]
    Database(#[from] BillingNoteError),
}

/// `POST /admin/backfill`. Schedules an immediate run.
pub async fn trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<ApiResponse<&'static str>>), ApiError> {
    let actor = state.authenticate(&headers)?;
    actor.require_admin()?;

    state.backfill().trigger().await.map_err(ApiError::storage)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::new("backfill scheduled")),
    ))
}
