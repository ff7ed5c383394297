use std::path::Path;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::geo::Coordinate;
use crate::models::chair::{Chair, ChairModel};
use crate::models::user::User;
use crate::store::{Store, StoreError};

/// Seed data loaded at startup in place of a database init script.
#[derive(Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub chair_models: Vec<ChairModel>,
    #[serde(default)]
    pub users: Vec<FixtureUser>,
    #[serde(default)]
    pub chairs: Vec<FixtureChair>,
    #[serde(default)]
    pub rides: Vec<FixtureRide>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureUser {
    pub id: Uuid,
    pub firstname: String,
    pub lastname: String,
}

#[derive(Debug, Deserialize)]
pub struct FixtureChair {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub is_active: bool,
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct FixtureRide {
    pub user_id: Uuid,
    pub pickup: Coordinate,
    pub destination: Coordinate,
}

impl Store {
    pub async fn from_fixture(fixture: Fixture) -> Result<Self, StoreError> {
        let store = Store::new()?;
        let chair_models = fixture.chair_models.len();
        let rides = fixture.rides.len();

        store
            .transaction(|tx| -> Result<(), StoreError> {
                for model in &fixture.chair_models {
                    tx.upsert_chair_model(&model.name, model.speed)?;
                }
                for user in &fixture.users {
                    tx.upsert_user(&User {
                        id: user.id,
                        firstname: user.firstname.clone(),
                        lastname: user.lastname.clone(),
                        created_at: Utc::now(),
                    })?;
                }
                for chair in &fixture.chairs {
                    if chair.access_token.is_empty() {
                        return Err(StoreError::Fixture(format!(
                            "chair {} has an empty access token",
                            chair.id
                        )));
                    }
                    let now = Utc::now();
                    tx.upsert_chair(&Chair {
                        id: chair.id,
                        owner_id: chair.owner_id,
                        name: chair.name.clone(),
                        model: chair.model.clone(),
                        is_active: chair.is_active,
                        access_token: chair.access_token.clone(),
                        location: None,
                        total_distance: 0,
                        total_distance_updated_at: None,
                        created_at: now,
                        updated_at: now,
                    })?;
                }
                for ride in &fixture.rides {
                    tx.insert_ride(&ride.user_id, ride.pickup, ride.destination)?;
                }
                Ok(())
            })
            .await?;

        info!(chair_models, rides, "store seeded from fixture");
        Ok(store)
    }

    pub async fn load_fixture(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| StoreError::Fixture(format!("failed to read {}: {err}", path.display())))?;
        let fixture: Fixture = serde_json::from_str(&raw)
            .map_err(|err| StoreError::Fixture(format!("failed to parse {}: {err}", path.display())))?;
        Store::from_fixture(fixture).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::Fixture;
    use crate::store::{Store, StoreError};

    #[tokio::test]
    async fn fixture_seeds_chairs_models_and_matching_rides() {
        let fixture: Fixture = serde_json::from_value(json!({
            "chair_models": [{ "name": "swift", "speed": 5 }],
            "users": [{ "id": Uuid::from_u128(10), "firstname": "Ren", "lastname": "Ito" }],
            "chairs": [{
                "id": Uuid::from_u128(1),
                "owner_id": Uuid::from_u128(2),
                "name": "c1",
                "model": "swift",
                "is_active": true,
                "access_token": "secret"
            }],
            "rides": [{
                "user_id": Uuid::from_u128(10),
                "pickup": { "latitude": 1, "longitude": 2 },
                "destination": { "latitude": 3, "longitude": 4 }
            }]
        }))
        .unwrap();

        let store = Store::from_fixture(fixture).await.unwrap();
        store
            .transaction(|tx| -> Result<(), StoreError> {
                assert_eq!(tx.chair_speeds()?.get("swift"), Some(&5));
                assert!(tx.chair_by_access_token("secret")?.is_some());

                let rides = tx.unassigned_rides()?;
                assert_eq!(rides.len(), 1);
                assert_eq!(tx.ride_statuses(&rides[0].id)?.len(), 1);
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ride_for_unknown_user_rejects_whole_fixture() {
        let fixture: Fixture = serde_json::from_value(json!({
            "rides": [{
                "user_id": Uuid::from_u128(77),
                "pickup": { "latitude": 0, "longitude": 0 },
                "destination": { "latitude": 1, "longitude": 1 }
            }]
        }))
        .unwrap();

        let result = Store::from_fixture(fixture).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn empty_access_token_is_refused() {
        let fixture: Fixture = serde_json::from_value(json!({
            "chairs": [{
                "id": Uuid::from_u128(1),
                "owner_id": Uuid::from_u128(2),
                "name": "c1",
                "model": "swift",
                "access_token": ""
            }]
        }))
        .unwrap();

        let result = Store::from_fixture(fixture).await;
        assert!(matches!(result, Err(StoreError::Fixture(_))));
    }
}
