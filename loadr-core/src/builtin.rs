use loadr_metrics::{MetricId, MetricKind, MetricUnit, Registry};

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const DATA_RECEIVED: &str = "data_received";
pub const DATA_SENT: &str = "data_sent";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATIONS_FAILED: &str = "iterations_failed";
pub const ITERATIONS_INTERRUPTED: &str = "iterations_interrupted";
pub const CHECKS: &str = "checks";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

/// Ids of the metrics every run records.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinMetrics {
    pub http_reqs: MetricId,
    /// Milliseconds.
    pub http_req_duration: MetricId,
    pub http_req_failed: MetricId,
    pub data_received: MetricId,
    pub data_sent: MetricId,
    pub iterations: MetricId,
    /// Milliseconds, think time excluded.
    pub iteration_duration: MetricId,
    pub iterations_failed: MetricId,
    pub iterations_interrupted: MetricId,
    pub checks: MetricId,
    pub vus: MetricId,
    pub vus_max: MetricId,
}

impl BuiltinMetrics {
    pub fn register(metrics: &Registry) -> loadr_metrics::Result<Self> {
        use MetricKind::{Counter, Gauge, Rate, Trend};
        use MetricUnit::{Data, Time};
        let none = MetricUnit::Default;

        Ok(Self {
            http_reqs: metrics.register(HTTP_REQS, Counter, none)?,
            http_req_duration: metrics.register(HTTP_REQ_DURATION, Trend, Time)?,
            http_req_failed: metrics.register(HTTP_REQ_FAILED, Rate, none)?,
            data_received: metrics.register(DATA_RECEIVED, Counter, Data)?,
            data_sent: metrics.register(DATA_SENT, Counter, Data)?,
            iterations: metrics.register(ITERATIONS, Counter, none)?,
            iteration_duration: metrics.register(ITERATION_DURATION, Trend, Time)?,
            iterations_failed: metrics.register(ITERATIONS_FAILED, Counter, none)?,
            iterations_interrupted: metrics.register(ITERATIONS_INTERRUPTED, Counter, none)?,
            checks: metrics.register(CHECKS, Rate, none)?,
            vus: metrics.register(VUS, Gauge, none)?,
            vus_max: metrics.register(VUS_MAX, Gauge, none)?,
        })
    }
}

/// Milliseconds as a trend sample value.
#[inline]
pub fn duration_ms(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
