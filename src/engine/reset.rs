use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use crate::store::StoreError;

#[derive(Debug, Clone, Serialize)]
pub struct ResetSummary {
    pub chairs_replayed: usize,
    pub rides_cached: usize,
}

/// Drops every cached entry and rebuilds derived state from persisted
/// history. Assumes no other traffic while it runs.
pub async fn reinitialize(state: &AppState) -> Result<ResetSummary, AppError> {
    state.cache.clear();

    let (chairs_replayed, rides) = state
        .store
        .transaction(|tx| -> Result<_, StoreError> {
            let chairs_replayed = tx.replay_chair_locations()?;
            Ok((chairs_replayed, tx.rides()?))
        })
        .await?;

    let mut latest: HashMap<Uuid, (DateTime<Utc>, Uuid)> = HashMap::new();
    for ride in &rides {
        let Some(chair_id) = ride.chair_id else {
            continue;
        };
        latest
            .entry(chair_id)
            .and_modify(|current| {
                if ride.updated_at > current.0 {
                    *current = (ride.updated_at, ride.id);
                }
            })
            .or_insert((ride.updated_at, ride.id));
    }

    for (chair_id, (_, ride_id)) in &latest {
        state.cache.set_ride_for_chair(*chair_id, *ride_id);
    }

    info!(
        chairs_replayed,
        rides_cached = latest.len(),
        "state reinitialized"
    );

    Ok(ResetSummary {
        chairs_replayed,
        rides_cached: latest.len(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::reinitialize;
    use crate::config::Config;
    use crate::geo::Coordinate;
    use crate::models::chair::Chair;
    use crate::models::user::User;
    use crate::state::AppState;
    use crate::store::{Store, StoreError};

    fn chair(seed: u128) -> Chair {
        let now = Utc::now();
        Chair {
            id: Uuid::from_u128(seed),
            owner_id: Uuid::from_u128(500),
            name: format!("chair-{seed}"),
            model: "basic".to_string(),
            is_active: true,
            access_token: format!("token-{seed}"),
            location: None,
            total_distance: 0,
            total_distance_updated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn reset_replays_history_and_rebuilds_ride_cache() {
        let store = Store::new().unwrap();
        let chair_id = Uuid::from_u128(1);
        let (older, newer) = store
            .transaction(|tx| -> Result<_, StoreError> {
                tx.upsert_chair(&chair(1))?;
                tx.upsert_user(&User {
                    id: Uuid::from_u128(900),
                    firstname: "Jo".to_string(),
                    lastname: "Park".to_string(),
                    created_at: Utc::now(),
                })?;
                tx.record_location(&chair_id, Coordinate::new(0, 0))?;
                tx.record_location(&chair_id, Coordinate::new(4, 0))?;
                tx.record_location(&chair_id, Coordinate::new(4, 3))?;

                let older = tx.insert_ride(
                    &Uuid::from_u128(900),
                    Coordinate::new(0, 0),
                    Coordinate::new(1, 1),
                )?;
                tx.assign_ride(&older.id, &chair_id)?;
                let newer = tx.insert_ride(
                    &Uuid::from_u128(900),
                    Coordinate::new(2, 2),
                    Coordinate::new(3, 3),
                )?;
                tx.assign_ride(&newer.id, &chair_id)?;

                // A drifted row that the replay must repair.
                let mut drifted = tx.chair(&chair_id)?.unwrap();
                drifted.location = Some(Coordinate::new(99, 99));
                drifted.total_distance = 1_000;
                tx.upsert_chair(&drifted)?;
                Ok((older.id, newer.id))
            })
            .await
            .unwrap();

        let (state, _rx) = AppState::new(store, &Config::default());
        state.cache.set_ride_for_chair(chair_id, older);
        state.cache.remember_chair(chair(1));

        let summary = reinitialize(&state).await.unwrap();
        assert_eq!(summary.chairs_replayed, 1);
        assert_eq!(summary.rides_cached, 1);
        assert_eq!(state.cache.ride_for_chair(&chair_id), Some(newer));
        assert_eq!(state.cache.cached_chairs(), 0);

        let replayed = state
            .store
            .transaction(|tx| tx.chair(&chair_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replayed.location, Some(Coordinate::new(4, 3)));
        assert_eq!(replayed.total_distance, 7);
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let (state, _rx) = AppState::new(Store::new().unwrap(), &Config::default());
        let first = reinitialize(&state).await.unwrap();
        let second = reinitialize(&state).await.unwrap();
        assert_eq!(first.chairs_replayed, second.chairs_replayed);
        assert_eq!(first.rides_cached, 0);
    }
}
