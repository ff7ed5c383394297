//! Greedy chair/ride matching.
//!
//! Each pass runs inside one store transaction, so concurrent passes are
//! serialised and a chair can never be claimed twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::scoring::estimated_time;
use crate::error::AppError;
use crate::geo::Coordinate;
use crate::models::assignment::AssignmentEvent;
use crate::models::ride::Ride;
use crate::state::AppState;
use crate::store::StoreError;

/// An idle chair eligible for this pass.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chair_id: Uuid,
    pub access_token: String,
    pub position: Coordinate,
    pub speed: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAssignment {
    pub ride_id: Uuid,
    pub chair_id: Uuid,
    pub estimated_time: f64,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub unmatched_rides: usize,
    pub idle_chairs: usize,
    pub assignments: Vec<PlannedAssignment>,
}

/// Longest trips pick first; each takes the unclaimed candidate with the
/// lowest estimated time. Ties keep the earlier candidate.
///
/// `rides` must arrive oldest first: the span sort is stable, so equal spans
/// keep request order.
pub fn plan_assignments(mut rides: Vec<Ride>, candidates: &[Candidate]) -> Vec<PlannedAssignment> {
    rides.sort_by(|a, b| b.trip_span().cmp(&a.trip_span()));

    let mut claimed = vec![false; candidates.len()];
    let mut plan = Vec::new();

    for ride in &rides {
        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in candidates.iter().enumerate() {
            if claimed[idx] {
                continue;
            }
            let Some(time) = estimated_time(&candidate.position, ride, candidate.speed) else {
                continue;
            };
            if best.map_or(true, |(_, best_time)| time < best_time) {
                best = Some((idx, time));
            }
        }

        if let Some((idx, time)) = best {
            claimed[idx] = true;
            plan.push(PlannedAssignment {
                ride_id: ride.id,
                chair_id: candidates[idx].chair_id,
                estimated_time: time,
            });
        }
    }

    plan
}

pub async fn run_dispatch_pass(state: &AppState) -> Result<DispatchSummary, AppError> {
    let start = Instant::now();
    let result = dispatch(state).await;
    let elapsed = start.elapsed().as_secs_f64();

    let outcome = if result.is_ok() { "success" } else { "error" };
    state
        .metrics
        .dispatch_pass_latency_seconds
        .with_label_values(&[outcome])
        .observe(elapsed);

    result
}

async fn dispatch(state: &AppState) -> Result<DispatchSummary, AppError> {
    let pass = state
        .store
        .transaction(|tx| -> Result<_, StoreError> {
            let rides = tx.unassigned_rides()?;
            if rides.is_empty() {
                return Ok(None);
            }

            let speeds = tx.chair_speeds()?;
            let mut unknown_models = 0usize;
            let mut candidates = Vec::new();
            for chair in tx.chairs()? {
                if !chair.is_active {
                    continue;
                }
                let Some(position) = chair.location else {
                    continue;
                };
                let Some(&speed) = speeds.get(&chair.model) else {
                    unknown_models += 1;
                    continue;
                };
                if !tx.is_chair_idle(&chair.id)? {
                    continue;
                }
                candidates.push(Candidate {
                    chair_id: chair.id,
                    access_token: chair.access_token,
                    position,
                    speed,
                });
            }

            let unmatched = rides.len();
            let plan = plan_assignments(rides, &candidates);
            for assignment in &plan {
                tx.assign_ride(&assignment.ride_id, &assignment.chair_id)?;
            }
            Ok(Some((unmatched, candidates, plan, unknown_models)))
        })
        .await?;

    let Some((unmatched, candidates, plan, unknown_models)) = pass else {
        state.metrics.unmatched_rides.set(0);
        return Ok(DispatchSummary::default());
    };
    if unknown_models > 0 {
        warn!(chairs = unknown_models, "active chairs with an unknown model were skipped");
    }

    let idle_chairs = candidates.len();
    let tokens: HashMap<Uuid, &str> = candidates
        .iter()
        .map(|candidate| (candidate.chair_id, candidate.access_token.as_str()))
        .collect();
    let assigned_at = Utc::now();
    for assignment in &plan {
        if let Some(token) = tokens.get(&assignment.chair_id) {
            state.cache.invalidate_token(token);
        }
        state
            .cache
            .set_ride_for_chair(assignment.chair_id, assignment.ride_id);

        let _ = state.assignment_events_tx.send(AssignmentEvent {
            ride_id: assignment.ride_id,
            chair_id: assignment.chair_id,
            estimated_time: assignment.estimated_time,
            assigned_at,
        });

        info!(
            ride_id = %assignment.ride_id,
            chair_id = %assignment.chair_id,
            estimated_time = assignment.estimated_time,
            "ride assigned"
        );
    }

    state
        .metrics
        .dispatch_assignments_total
        .inc_by(plan.len() as u64);
    state
        .metrics
        .unmatched_rides
        .set((unmatched - plan.len()) as i64);

    debug!(
        unmatched,
        idle_chairs,
        assigned = plan.len(),
        "dispatch pass finished"
    );

    Ok(DispatchSummary {
        unmatched_rides: unmatched,
        idle_chairs,
        assignments: plan,
    })
}

/// Background trigger loop: a pass runs whenever `dispatch_trigger` is
/// notified and, with a `period`, on every tick as well.
pub async fn run_dispatch_scheduler(state: Arc<AppState>, period: Option<Duration>) {
    info!(
        period_ms = period.map(|p| p.as_millis() as u64),
        "dispatch scheduler started"
    );

    let mut ticker = period.map(|period| {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    loop {
        match ticker.as_mut() {
            Some(ticker) => {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = state.dispatch_trigger.notified() => {}
                }
            }
            None => state.dispatch_trigger.notified().await,
        }

        if let Err(err) = run_dispatch_pass(&state).await {
            error!(error = %err, "dispatch pass failed");
        }
    }
}
