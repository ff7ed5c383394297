use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinate;

/// Immutable record of one ingested position report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChairLocation {
    pub id: Uuid,
    pub chair_id: Uuid,
    pub coordinate: Coordinate,
    pub created_at: DateTime<Utc>,
}
