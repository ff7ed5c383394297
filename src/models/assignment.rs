use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Published once per chair/ride pairing committed by a dispatch pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub ride_id: Uuid,
    pub chair_id: Uuid,
    pub estimated_time: f64,
    pub assigned_at: DateTime<Utc>,
}
