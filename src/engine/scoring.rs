use crate::geo::{manhattan_distance, Coordinate};
use crate::models::ride::Ride;

const APPROACH_WEIGHT: i64 = 1;
const TRIP_WEIGHT: i64 = 10;

/// Estimated completion time of `ride` for a chair at `chair_position`:
/// weighted approach and trip legs over the chair model's speed. Lower is
/// better. `None` when the speed cannot produce a finite estimate.
pub fn estimated_time(chair_position: &Coordinate, ride: &Ride, speed: i32) -> Option<f64> {
    if speed <= 0 {
        return None;
    }

    let approach = manhattan_distance(chair_position, &ride.pickup);
    let trip = ride.trip_span();
    let weighted = approach * APPROACH_WEIGHT + trip * TRIP_WEIGHT;

    Some(weighted as f64 / f64::from(speed))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::estimated_time;
    use crate::geo::Coordinate;
    use crate::models::ride::Ride;

    fn ride(pickup: (i32, i32), destination: (i32, i32)) -> Ride {
        Ride {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            chair_id: None,
            pickup: Coordinate::new(pickup.0, pickup.1),
            destination: Coordinate::new(destination.0, destination.1),
            evaluation: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fast_distant_chair_beats_slow_nearby_chair() {
        let ride = ride((1, 1), (2, 2));

        let slow_near = estimated_time(&Coordinate::new(0, 0), &ride, 1).unwrap();
        let fast_far = estimated_time(&Coordinate::new(100, 100), &ride, 100).unwrap();

        assert_eq!(slow_near, 22.0);
        assert!((fast_far - 2.18).abs() < 1e-9);
        assert!(fast_far < slow_near);
    }

    #[test]
    fn closer_chair_wins_at_equal_speed() {
        let ride = ride((10, 10), (20, 20));

        let near = estimated_time(&Coordinate::new(9, 10), &ride, 3).unwrap();
        let far = estimated_time(&Coordinate::new(40, 40), &ride, 3).unwrap();

        assert!(near < far);
    }

    #[test]
    fn trip_leg_outweighs_approach_leg() {
        let short_trip = ride((0, 0), (0, 1));
        let long_trip = ride((0, 5), (0, 6));
        let chair = Coordinate::new(0, 0);

        assert_eq!(estimated_time(&chair, &short_trip, 1), Some(10.0));
        assert_eq!(estimated_time(&chair, &long_trip, 1), Some(15.0));
    }

    #[test]
    fn non_positive_speed_has_no_estimate() {
        let ride = ride((0, 0), (1, 1));
        assert_eq!(estimated_time(&Coordinate::new(0, 0), &ride, 0), None);
        assert_eq!(estimated_time(&Coordinate::new(0, 0), &ride, -2), None);
    }
}
