use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub coordinates_ingested_total: IntCounter,
    pub coordinate_queue_depth: IntGauge,
    pub batch_latency_seconds: HistogramVec,
    pub ride_transitions_total: IntCounterVec,
    pub dispatch_assignments_total: IntCounter,
    pub dispatch_pass_latency_seconds: HistogramVec,
    pub unmatched_rides: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let coordinates_ingested_total = IntCounter::new(
            "coordinates_ingested_total",
            "Position reports persisted by the batch writer",
        )
        .expect("valid coordinates_ingested_total metric");

        let coordinate_queue_depth = IntGauge::new(
            "coordinate_queue_depth",
            "Position reports waiting for the next batch",
        )
        .expect("valid coordinate_queue_depth metric");

        let batch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "batch_latency_seconds",
                "Time spent persisting one coordinate batch",
            ),
            &["outcome"],
        )
        .expect("valid batch_latency_seconds metric");

        let ride_transitions_total = IntCounterVec::new(
            Opts::new(
                "ride_transitions_total",
                "Ride status entries appended, by status",
            ),
            &["status"],
        )
        .expect("valid ride_transitions_total metric");

        let dispatch_assignments_total = IntCounter::new(
            "dispatch_assignments_total",
            "Chair/ride assignments committed by dispatch passes",
        )
        .expect("valid dispatch_assignments_total metric");

        let dispatch_pass_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dispatch_pass_latency_seconds",
                "Duration of one dispatch pass",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_pass_latency_seconds metric");

        let unmatched_rides = IntGauge::new(
            "unmatched_rides",
            "Rides left without a chair after the last dispatch pass",
        )
        .expect("valid unmatched_rides metric");

        registry
            .register(Box::new(coordinates_ingested_total.clone()))
            .expect("register coordinates_ingested_total");
        registry
            .register(Box::new(coordinate_queue_depth.clone()))
            .expect("register coordinate_queue_depth");
        registry
            .register(Box::new(batch_latency_seconds.clone()))
            .expect("register batch_latency_seconds");
        registry
            .register(Box::new(ride_transitions_total.clone()))
            .expect("register ride_transitions_total");
        registry
            .register(Box::new(dispatch_assignments_total.clone()))
            .expect("register dispatch_assignments_total");
        registry
            .register(Box::new(dispatch_pass_latency_seconds.clone()))
            .expect("register dispatch_pass_latency_seconds");
        registry
            .register(Box::new(unmatched_rides.clone()))
            .expect("register unmatched_rides");

        Self {
            registry,
            coordinates_ingested_total,
            coordinate_queue_depth,
            batch_latency_seconds,
            ride_transitions_total,
            dispatch_assignments_total,
            dispatch_pass_latency_seconds,
            unmatched_rides,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
