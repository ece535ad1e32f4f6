use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read script {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid script: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("undefined variable `{name}` in {context}")]
    UndefinedVar { name: String, context: String },

    #[error("unterminated `${{` placeholder in {context}")]
    UnterminatedPlaceholder { context: String },

    #[error("exec `{exec}`: {reason}")]
    InvalidRequest { exec: String, reason: String },

    #[error("exec `{exec}`, check `{check}`: {reason}")]
    InvalidCheck {
        exec: String,
        check: String,
        reason: String,
    },

    #[error("exec `{exec}` sends a relative path but no base URL is set (use `baseUrl`, BASE_URL or --base-url)")]
    MissingBaseUrl { exec: String },

    #[error("metric `{name}` is declared as {declared} but used as {used} by exec `{exec}`")]
    MetricKindConflict {
        name: String,
        declared: loadr_core::metrics::MetricKind,
        used: loadr_core::metrics::MetricKind,
        exec: String,
    },

    #[error(transparent)]
    Threshold(#[from] loadr_core::ThresholdError),
}
