use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chair {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub model: String,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub location: Option<Coordinate>,
    pub total_distance: i64,
    pub total_distance_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Static performance profile; `speed` divides the dispatch time metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChairModel {
    pub name: String,
    pub speed: i32,
}
