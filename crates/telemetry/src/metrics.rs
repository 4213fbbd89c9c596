use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Live Session Metrics ====
    pub static ref LIVE_SESSION_OPERATIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "live_session_operations_total",
                "Total number of coordinator operations",
            ),
            &["operation", "outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LIVE_SESSION_BUSY_REJECTIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "live_session_busy_rejections_total",
                "Operations rejected because another mutation was in flight",
            ),
            &["operation"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LIVE_SESSION_STREAM_EPOCH: IntGauge = {
        let metric = IntGauge::new("live_session_stream_epoch", "Current stream epoch")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LIVE_SESSION_STREAM_PHASE: IntGaugeVec = {
        let metric = IntGaugeVec::new(
            Opts::new(
                "live_session_stream_phase",
                "1 for the phase the live stream is currently in",
            ),
            &["phase"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LIVE_SESSION_DETECTIONS_INGESTED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "live_session_detections_ingested_total",
                "Detection records accepted into the ledger",
            ),
            &["freshness"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LIVE_SESSION_DETECTIONS_REJECTED: IntCounter = {
        let metric = IntCounter::new(
            "live_session_detections_rejected_total",
            "Detection batches rejected at validation",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LIVE_SESSION_POLL_ERRORS: IntCounter = {
        let metric = IntCounter::new(
            "live_session_poll_errors_total",
            "Detection feed polls that failed",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Marks `phase` as the active stream phase and clears the others.
pub fn set_stream_phase(phase: &str, all_phases: &[&str]) {
    for &candidate in all_phases {
        LIVE_SESSION_STREAM_PHASE
            .with_label_values(&[candidate])
            .set(i64::from(candidate == phase));
    }
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}
