use crate::geo::Coordinate;
use crate::models::ride::{Ride, RideStatusKind};

/// Decides whether a chair reaching `position` moves its active ride along.
///
/// Arrival is an exact coordinate match; there is no tolerance radius.
pub fn derive_transition(
    ride: &Ride,
    current: RideStatusKind,
    position: Coordinate,
) -> Option<RideStatusKind> {
    if current.is_terminal() {
        return None;
    }

    match current {
        RideStatusKind::Enroute if position == ride.pickup => Some(RideStatusKind::Pickup),
        RideStatusKind::Carrying if position == ride.destination => Some(RideStatusKind::Arrived),
        _ => None,
    }
}
