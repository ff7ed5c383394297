//! Coordinate ingestion: a bounded queue fed by request handlers and a single
//! periodic batch writer that persists positions and derives ride arrivals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::deriver::derive_transition;
use crate::error::AppError;
use crate::geo::Coordinate;
use crate::models::ride::RideStatusKind;
use crate::state::AppState;
use crate::store::{Store, StoreError};

/// One queued position report. The producer waits on `respond_to` for the
/// batch completion timestamp in milliseconds, or the reason the batch failed.
pub struct CoordinateReport {
    pub chair_id: Uuid,
    pub coordinate: Coordinate,
    pub respond_to: oneshot::Sender<Result<i64, String>>,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub recorded_at: i64,
    pub locations: usize,
    pub transitions: Vec<(Uuid, RideStatusKind)>,
}

/// Queues a report and suspends until the batch holding it commits.
///
/// A full queue blocks the caller instead of dropping the report.
pub async fn submit_coordinate(
    state: &AppState,
    chair_id: Uuid,
    coordinate: Coordinate,
) -> Result<i64, AppError> {
    let (respond_to, response) = oneshot::channel();
    // Counted before the send so the writer's decrement never runs first.
    state.metrics.coordinate_queue_depth.inc();
    let sent = state
        .coordinate_tx
        .send(CoordinateReport {
            chair_id,
            coordinate,
            respond_to,
        })
        .await;
    if let Err(err) = sent {
        state.metrics.coordinate_queue_depth.dec();
        return Err(AppError::Unavailable(format!(
            "coordinate queue send failed: {err}"
        )));
    }

    match time::timeout(state.ingest_timeout, response).await {
        Ok(Ok(Ok(recorded_at))) => Ok(recorded_at),
        Ok(Ok(Err(reason))) => Err(AppError::Unavailable(format!(
            "coordinate batch failed: {reason}"
        ))),
        Ok(Err(_)) => Err(AppError::Unavailable(
            "coordinate batch writer dropped the report".to_string(),
        )),
        Err(_) => Err(AppError::Unavailable(format!(
            "coordinate batch not committed within {}ms",
            state.ingest_timeout.as_millis()
        ))),
    }
}

/// Drains the queue once per `period`. Runs as a single task, so two batches
/// never overlap; ticks missed while a batch is still writing are skipped.
pub async fn run_batch_writer(
    state: Arc<AppState>,
    mut coordinate_rx: mpsc::Receiver<CoordinateReport>,
    period: Duration,
) {
    info!(period_ms = period.as_millis() as u64, "batch writer started");

    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        if coordinate_rx.is_empty() {
            if coordinate_rx.is_closed() {
                break;
            }
            continue;
        }

        // Only what is queued right now; later arrivals wait for the next tick.
        let pending = coordinate_rx.len();
        let mut batch = Vec::with_capacity(pending);
        while batch.len() < pending {
            match coordinate_rx.try_recv() {
                Ok(report) => batch.push(report),
                Err(_) => break,
            }
        }
        state.metrics.coordinate_queue_depth.sub(batch.len() as i64);

        flush_batch(&state, batch).await;
    }

    warn!("batch writer stopped: coordinate channel closed");
}

async fn flush_batch(state: &AppState, batch: Vec<CoordinateReport>) {
    let start = Instant::now();
    let positions: Vec<(Uuid, Coordinate)> = batch
        .iter()
        .map(|report| (report.chair_id, report.coordinate))
        .collect();

    let result = persist_batch(&state.store, &positions).await;
    let elapsed = start.elapsed().as_secs_f64();

    match result {
        Ok(outcome) => {
            state
                .metrics
                .batch_latency_seconds
                .with_label_values(&["success"])
                .observe(elapsed);
            state
                .metrics
                .coordinates_ingested_total
                .inc_by(outcome.locations as u64);
            for (ride_id, status) in &outcome.transitions {
                state
                    .metrics
                    .ride_transitions_total
                    .with_label_values(&[status.as_str()])
                    .inc();
                info!(ride_id = %ride_id, status = %status, "ride status derived from position");
            }
            debug!(
                locations = outcome.locations,
                transitions = outcome.transitions.len(),
                "coordinate batch committed"
            );

            for report in batch {
                let _ = report.respond_to.send(Ok(outcome.recorded_at));
            }
        }
        Err(err) => {
            state
                .metrics
                .batch_latency_seconds
                .with_label_values(&["error"])
                .observe(elapsed);
            error!(error = %err, reports = batch.len(), "coordinate batch abandoned");

            let reason = err.to_string();
            for report in batch {
                let _ = report.respond_to.send(Err(reason.clone()));
            }
        }
    }
}

/// Writes one batch in a single transaction: every position is recorded,
/// each chair ends at its last reported position, and each touched chair's
/// active ride is checked for an arrival at that position.
pub async fn persist_batch(
    store: &Store,
    positions: &[(Uuid, Coordinate)],
) -> Result<BatchOutcome, StoreError> {
    let transitions = store
        .transaction(|tx| -> Result<_, StoreError> {
            let mut newest: Vec<(Uuid, Coordinate)> = Vec::new();
            let mut slots: HashMap<Uuid, usize> = HashMap::new();
            for (chair_id, coordinate) in positions {
                tx.record_location(chair_id, *coordinate)?;
                match slots.get(chair_id) {
                    Some(&slot) => newest[slot].1 = *coordinate,
                    None => {
                        slots.insert(*chair_id, newest.len());
                        newest.push((*chair_id, *coordinate));
                    }
                }
            }

            let mut transitions = Vec::new();
            for (chair_id, position) in &newest {
                let Some(ride) = tx.latest_ride_for_chair(chair_id)? else {
                    continue;
                };
                let Some(current) = tx.latest_status(&ride.id)?.map(|entry| entry.status) else {
                    continue;
                };
                if let Some(next) = derive_transition(&ride, current, *position) {
                    tx.append_ride_status(&ride.id, next)?;
                    transitions.push((ride.id, next));
                }
            }
            Ok(transitions)
        })
        .await?;

    Ok(BatchOutcome {
        recorded_at: Utc::now().timestamp_millis(),
        locations: positions.len(),
        transitions,
    })
}
