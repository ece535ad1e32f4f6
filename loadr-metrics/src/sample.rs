use std::time::Duration;

use crate::metrics::MetricKind;
use crate::registry::MetricId;
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Counter(u64),
    Gauge(f64),
    Rate(bool),
    Trend(f64),
}

impl SampleValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }
}

/// One recorded value, attributed to a series and stamped relative to run start.
#[derive(Debug, Clone)]
pub struct Sample {
    pub metric: MetricId,
    pub tags: TagSet,
    pub value: SampleValue,
    pub at: Duration,
}
