use crate::thresholds::ThresholdError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no scenarios configured")]
    NoScenarios,

    #[error("scenario `{0}` is defined more than once")]
    DuplicateScenario(String),

    #[error("scenario `{scenario}`: `vus` must be between 1 and {}", crate::config::MAX_VUS)]
    InvalidVus { scenario: String },

    #[error("scenario `{scenario}`: `iterations` must be a positive integer")]
    InvalidIterations { scenario: String },

    #[error("scenario `{scenario}`: `duration` must be a positive duration")]
    InvalidDuration { scenario: String },

    #[error("scenario `{scenario}`: `{field}` is not supported by the `{executor}` executor")]
    UnsupportedField {
        scenario: String,
        executor: String,
        field: &'static str,
    },

    #[error(
        "scenario `{scenario}`: invalid `executor` `{executor}` (expected `constant-vus` or `per-vu-iterations`)"
    )]
    InvalidExecutor { scenario: String, executor: String },

    #[error("scenario `{scenario}` references unknown exec `{exec}`")]
    UnknownExec { scenario: String, exec: String },

    #[error(transparent)]
    Metrics(#[from] loadr_metrics::Error),

    #[error(transparent)]
    Threshold(#[from] ThresholdError),

    #[error("run controller has already been started")]
    AlreadyStarted,

    #[error("scheduler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether the error comes from invalid configuration rather than the run itself.
    #[must_use]
    pub fn is_config(&self) -> bool {
        !matches!(self, Self::AlreadyStarted | Self::Join(_))
    }
}
