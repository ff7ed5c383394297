use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::Coordinate;
use crate::models::ride::{RideStatus, RideStatusKind};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct NotificationUser {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChairNotification {
    pub ride_id: Uuid,
    pub user: NotificationUser,
    pub pickup_coordinate: Coordinate,
    pub destination_coordinate: Coordinate,
    pub status: RideStatusKind,
}

/// Current ride and status for a chair.
///
/// The oldest entry the chair has not seen yet is returned and acknowledged;
/// once everything is acknowledged the latest status is returned unchanged.
pub async fn resolve_chair_notification(
    state: &AppState,
    chair_id: Uuid,
) -> Result<Option<ChairNotification>, AppError> {
    let cached_ride_id = state.cache.ride_for_chair(&chair_id);

    let resolved = state
        .store
        .transaction(|tx| -> Result<_, AppError> {
            let cached = match cached_ride_id {
                Some(ride_id) => tx
                    .ride(&ride_id)?
                    .filter(|ride| ride.chair_id == Some(chair_id)),
                None => None,
            };
            let ride = match cached {
                Some(ride) => ride,
                None => match tx.latest_ride_for_chair(&chair_id)? {
                    Some(ride) => ride,
                    None => return Ok(None),
                },
            };

            let (status, unsent) = match tx.oldest_unsent_status(&ride.id)? {
                Some(entry) => (entry.status, Some(entry.id)),
                None => {
                    let latest = tx.latest_status(&ride.id)?.ok_or_else(|| {
                        AppError::Internal(format!("ride {} has no status", ride.id))
                    })?;
                    (latest.status, None)
                }
            };

            let user = tx
                .user(&ride.user_id)?
                .ok_or_else(|| AppError::NotFound(format!("user {} not found", ride.user_id)))?;

            if let Some(status_id) = unsent {
                tx.mark_status_sent(&ride.id, &status_id)?;
            }
            Ok(Some((ride, user, status)))
        })
        .await?;

    let Some((ride, user, status)) = resolved else {
        return Ok(None);
    };
    if cached_ride_id != Some(ride.id) {
        state.cache.set_ride_for_chair(chair_id, ride.id);
    }

    Ok(Some(ChairNotification {
        ride_id: ride.id,
        user: NotificationUser {
            id: user.id,
            name: user.display_name(),
        },
        pickup_coordinate: ride.pickup,
        destination_coordinate: ride.destination,
        status,
    }))
}

/// Appends a chair-requested status. Only the direct successor of the
/// ride's latest status is accepted.
pub async fn advance_ride_status(
    state: &AppState,
    chair_id: Uuid,
    ride_id: Uuid,
    requested: &str,
) -> Result<RideStatus, AppError> {
    let target: RideStatusKind = requested.parse().map_err(AppError::BadRequest)?;
    if !target.is_chair_initiated() {
        return Err(AppError::BadRequest(format!(
            "status {target} cannot be set by a chair"
        )));
    }

    let entry = state
        .store
        .transaction(|tx| -> Result<_, AppError> {
            let ride = tx
                .ride(&ride_id)?
                .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} not found")))?;
            if ride.chair_id != Some(chair_id) {
                return Err(AppError::Conflict("not assigned to this ride".to_string()));
            }

            let current = tx
                .latest_status(&ride_id)?
                .map(|entry| entry.status)
                .ok_or_else(|| AppError::Internal(format!("ride {ride_id} has no status")))?;
            if current.next() != Some(target) {
                return Err(AppError::Conflict(format!(
                    "cannot move ride from {current} to {target}"
                )));
            }

            Ok(tx.append_ride_status(&ride_id, target)?)
        })
        .await?;

    state
        .metrics
        .ride_transitions_total
        .with_label_values(&[target.as_str()])
        .inc();
    info!(ride_id = %ride_id, chair_id = %chair_id, status = %target, "ride status advanced by chair");

    Ok(entry)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{advance_ride_status, resolve_chair_notification};
    use crate::config::Config;
    use crate::error::AppError;
    use crate::geo::Coordinate;
    use crate::models::chair::Chair;
    use crate::models::ride::{RideStatus, RideStatusKind};
    use crate::models::user::User;
    use crate::state::AppState;
    use crate::store::{Store, StoreError};

    const CHAIR: u128 = 1;
    const OTHER_CHAIR: u128 = 2;

    fn chair(seed: u128) -> Chair {
        let now = Utc::now();
        Chair {
            id: Uuid::from_u128(seed),
            owner_id: Uuid::from_u128(500),
            name: format!("chair-{seed}"),
            model: "basic".to_string(),
            is_active: true,
            access_token: format!("token-{seed}"),
            location: Some(Coordinate::new(0, 0)),
            total_distance: 0,
            total_distance_updated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn state_with_assigned_ride() -> (AppState, Uuid) {
        let store = Store::new().unwrap();
        let ride_id = store
            .transaction(|tx| -> Result<Uuid, StoreError> {
                tx.upsert_chair(&chair(CHAIR))?;
                tx.upsert_chair(&chair(OTHER_CHAIR))?;
                tx.upsert_user(&User {
                    id: Uuid::from_u128(900),
                    firstname: "Mira".to_string(),
                    lastname: "Okafor".to_string(),
                    created_at: Utc::now(),
                })?;
                let ride = tx.insert_ride(
                    &Uuid::from_u128(900),
                    Coordinate::new(1, 2),
                    Coordinate::new(3, 4),
                )?;
                tx.assign_ride(&ride.id, &Uuid::from_u128(CHAIR))?;
                Ok(ride.id)
            })
            .await
            .unwrap();
        (AppState::new(store, &Config::default()).0, ride_id)
    }

    async fn latest_entry(state: &AppState, ride_id: Uuid) -> RideStatus {
        state
            .store
            .transaction(|tx| tx.latest_status(&ride_id))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn chair_without_rides_gets_empty_notification() {
        let (state, _) = state_with_assigned_ride().await;
        let notification = resolve_chair_notification(&state, Uuid::from_u128(OTHER_CHAIR))
            .await
            .unwrap();
        assert!(notification.is_none());
    }

    #[tokio::test]
    async fn notification_acknowledges_once_and_repeats_latest() {
        let (state, ride_id) = state_with_assigned_ride().await;
        let chair_id = Uuid::from_u128(CHAIR);

        let first = resolve_chair_notification(&state, chair_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.ride_id, ride_id);
        assert_eq!(first.status, RideStatusKind::Matching);
        assert_eq!(first.user.name, "Mira Okafor");
        assert_eq!(first.pickup_coordinate, Coordinate::new(1, 2));

        let sent_at = latest_entry(&state, ride_id).await.chair_sent_at;
        assert!(sent_at.is_some());

        let second = resolve_chair_notification(&state, chair_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, RideStatusKind::Matching);

        assert_eq!(latest_entry(&state, ride_id).await.chair_sent_at, sent_at);
    }

    #[tokio::test]
    async fn unseen_entries_are_delivered_in_order() {
        let (state, ride_id) = state_with_assigned_ride().await;
        let chair_id = Uuid::from_u128(CHAIR);
        advance_ride_status(&state, chair_id, ride_id, "ENROUTE")
            .await
            .unwrap();

        let first = resolve_chair_notification(&state, chair_id).await.unwrap().unwrap();
        let second = resolve_chair_notification(&state, chair_id).await.unwrap().unwrap();
        assert_eq!(first.status, RideStatusKind::Matching);
        assert_eq!(second.status, RideStatusKind::Enroute);
    }

    #[tokio::test]
    async fn enroute_follows_matching() {
        let (state, ride_id) = state_with_assigned_ride().await;
        let entry = advance_ride_status(&state, Uuid::from_u128(CHAIR), ride_id, "ENROUTE")
            .await
            .unwrap();
        assert_eq!(entry.status, RideStatusKind::Enroute);
    }

    #[tokio::test]
    async fn skipping_ahead_is_a_conflict() {
        let (state, ride_id) = state_with_assigned_ride().await;
        let result = advance_ride_status(&state, Uuid::from_u128(CHAIR), ride_id, "CARRYING").await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let log = state
            .store
            .transaction(|tx| tx.ride_statuses(&ride_id))
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn other_chair_cannot_advance_the_ride() {
        let (state, ride_id) = state_with_assigned_ride().await;
        let result =
            advance_ride_status(&state, Uuid::from_u128(OTHER_CHAIR), ride_id, "ENROUTE").await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn geometry_statuses_and_unknown_names_are_rejected() {
        let (state, ride_id) = state_with_assigned_ride().await;
        let chair_id = Uuid::from_u128(CHAIR);

        let derived = advance_ride_status(&state, chair_id, ride_id, "PICKUP").await;
        assert!(matches!(derived, Err(AppError::BadRequest(_))));

        let unknown = advance_ride_status(&state, chair_id, ride_id, "TELEPORTED").await;
        assert!(matches!(unknown, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn unknown_ride_is_not_found() {
        let (state, _) = state_with_assigned_ride().await;
        let result =
            advance_ride_status(&state, Uuid::from_u128(CHAIR), Uuid::new_v4(), "ENROUTE").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
