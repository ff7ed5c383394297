use serde::{Deserialize, Serialize};

/// Integer grid position reported by chairs and stored on rides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: i32,
    pub longitude: i32,
}

impl Coordinate {
    pub fn new(latitude: i32, longitude: i32) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

pub fn manhattan_distance(a: &Coordinate, b: &Coordinate) -> i64 {
    let lat = (i64::from(a.latitude) - i64::from(b.latitude)).abs();
    let lon = (i64::from(a.longitude) - i64::from(b.longitude)).abs();
    lat + lon
}
