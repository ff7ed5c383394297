use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{manhattan_distance, Coordinate};

/// Lifecycle stage of a ride. Declaration order is the lifecycle order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatusKind {
    Matching,
    Enroute,
    Pickup,
    Carrying,
    Arrived,
    Completed,
    Canceled,
}

impl RideStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatusKind::Matching => "MATCHING",
            RideStatusKind::Enroute => "ENROUTE",
            RideStatusKind::Pickup => "PICKUP",
            RideStatusKind::Carrying => "CARRYING",
            RideStatusKind::Arrived => "ARRIVED",
            RideStatusKind::Completed => "COMPLETED",
            RideStatusKind::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatusKind::Completed | RideStatusKind::Canceled)
    }

    /// Direct successor on the main lifecycle path.
    pub fn next(&self) -> Option<RideStatusKind> {
        match self {
            RideStatusKind::Matching => Some(RideStatusKind::Enroute),
            RideStatusKind::Enroute => Some(RideStatusKind::Pickup),
            RideStatusKind::Pickup => Some(RideStatusKind::Carrying),
            RideStatusKind::Carrying => Some(RideStatusKind::Arrived),
            RideStatusKind::Arrived => Some(RideStatusKind::Completed),
            RideStatusKind::Completed | RideStatusKind::Canceled => None,
        }
    }

    /// Statuses a chair may request itself; the rest come from geometry or
    /// from the rider side.
    pub fn is_chair_initiated(&self) -> bool {
        matches!(self, RideStatusKind::Enroute | RideStatusKind::Carrying)
    }
}

impl fmt::Display for RideStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MATCHING" => Ok(RideStatusKind::Matching),
            "ENROUTE" => Ok(RideStatusKind::Enroute),
            "PICKUP" => Ok(RideStatusKind::Pickup),
            "CARRYING" => Ok(RideStatusKind::Carrying),
            "ARRIVED" => Ok(RideStatusKind::Arrived),
            "COMPLETED" => Ok(RideStatusKind::Completed),
            "CANCELED" => Ok(RideStatusKind::Canceled),
            other => Err(format!("unknown ride status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub user_id: Uuid,
    pub chair_id: Option<Uuid>,
    pub pickup: Coordinate,
    pub destination: Coordinate,
    pub evaluation: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    /// Manhattan distance from pickup to destination.
    pub fn trip_span(&self) -> i64 {
        manhattan_distance(&self.pickup, &self.destination)
    }
}

/// One entry of a ride's append-only status log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideStatus {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub status: RideStatusKind,
    pub created_at: DateTime<Utc>,
    pub chair_sent_at: Option<DateTime<Utc>>,
}
