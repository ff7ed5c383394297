use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Notify};

use crate::cache::AvailabilityCache;
use crate::config::Config;
use crate::engine::ingest::CoordinateReport;
use crate::models::assignment::AssignmentEvent;
use crate::observability::metrics::Metrics;
use crate::store::Store;

pub struct AppState {
    pub store: Store,
    pub cache: AvailabilityCache,
    pub coordinate_tx: mpsc::Sender<CoordinateReport>,
    pub assignment_events_tx: broadcast::Sender<AssignmentEvent>,
    pub dispatch_trigger: Notify,
    pub ingest_timeout: Duration,
    pub notification_retry_ms: u64,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(store: Store, config: &Config) -> (Self, mpsc::Receiver<CoordinateReport>) {
        let (coordinate_tx, coordinate_rx) = mpsc::channel(config.coordinate_queue_size);
        let (assignment_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);

        (
            Self {
                store,
                cache: AvailabilityCache::new(),
                coordinate_tx,
                assignment_events_tx,
                dispatch_trigger: Notify::new(),
                ingest_timeout: config.ingest_timeout,
                notification_retry_ms: config.notification_retry_ms,
                metrics: Metrics::new(),
            },
            coordinate_rx,
        )
    }
}
