pub mod error;
pub mod key;
pub mod metrics;
pub mod query;
pub mod registry;
pub mod sample;
pub mod stats;
pub mod tags;
pub mod trend;

pub use error::{Error, Result};
pub use key::KeyId;
pub use metrics::{Counter, Gauge, MetricHandle, MetricKind, MetricUnit, Rate, Trend};
pub use query::{MetricSnapshot, Query};
pub use registry::{MetricDef, MetricId, Registry, is_valid_metric_name};
pub use sample::{Sample, SampleValue};
pub use tags::TagSet;
pub use trend::{DEFAULT_MAX_TREND_SAMPLES, TrendSnapshot};
