use crate::metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "invalid metric name `{0}` (expected 1-128 chars of [A-Za-z0-9_], not starting with a digit)"
    )]
    InvalidName(String),

    #[error("metric `{name}` is already registered as a {existing}, cannot redefine it as a {requested}")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("unknown metric id {0}")]
    UnknownMetric(u32),

    #[error("sample of kind {sample} cannot be recorded into {metric} metric `{name}`")]
    SampleKind {
        name: String,
        metric: MetricKind,
        sample: MetricKind,
    },
}
