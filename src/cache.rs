use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::models::chair::Chair;

/// Read-through lookups in front of the store.
///
/// The two maps are locked independently and no method touches both at once.
/// Entries may go stale between dispatch passes; the store stays the only
/// authority for assignments.
#[derive(Default)]
pub struct AvailabilityCache {
    chairs_by_token: DashMap<String, Chair>,
    rides_by_chair: DashMap<Uuid, Uuid>,
}

impl AvailabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chair_by_token(&self, token: &str) -> Option<Chair> {
        self.chairs_by_token
            .get(token)
            .map(|entry| entry.value().clone())
    }

    pub fn remember_chair(&self, chair: Chair) {
        self.chairs_by_token
            .insert(chair.access_token.clone(), chair);
    }

    pub fn invalidate_token(&self, token: &str) {
        if self.chairs_by_token.remove(token).is_some() {
            debug!("chair credential cache entry invalidated");
        }
    }

    pub fn ride_for_chair(&self, chair_id: &Uuid) -> Option<Uuid> {
        self.rides_by_chair.get(chair_id).map(|entry| *entry.value())
    }

    pub fn set_ride_for_chair(&self, chair_id: Uuid, ride_id: Uuid) {
        self.rides_by_chair.insert(chair_id, ride_id);
    }

    pub fn clear(&self) {
        self.chairs_by_token.clear();
        self.rides_by_chair.clear();
    }

    pub fn cached_chairs(&self) -> usize {
        self.chairs_by_token.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::AvailabilityCache;
    use crate::models::chair::Chair;

    fn chair(token: &str) -> Chair {
        let now = Utc::now();
        Chair {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "cached".to_string(),
            model: "basic".to_string(),
            is_active: true,
            access_token: token.to_string(),
            location: None,
            total_distance: 0,
            total_distance_updated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn invalidation_only_drops_the_named_credential() {
        let cache = AvailabilityCache::new();
        cache.remember_chair(chair("a"));
        cache.remember_chair(chair("b"));

        cache.invalidate_token("a");

        assert!(cache.chair_by_token("a").is_none());
        assert!(cache.chair_by_token("b").is_some());
    }

    #[test]
    fn clear_empties_both_maps() {
        let cache = AvailabilityCache::new();
        let cached = chair("a");
        let chair_id = cached.id;
        cache.remember_chair(cached);
        cache.set_ride_for_chair(chair_id, Uuid::new_v4());

        cache.clear();

        assert_eq!(cache.cached_chairs(), 0);
        assert!(cache.ride_for_chair(&chair_id).is_none());
    }

    #[test]
    fn ride_assignment_overwrites_previous_entry() {
        let cache = AvailabilityCache::new();
        let chair_id = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        cache.set_ride_for_chair(chair_id, first);
        cache.set_ride_for_chair(chair_id, second);

        assert_eq!(cache.ride_for_chair(&chair_id), Some(second));
    }
}
