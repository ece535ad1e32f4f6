mod builtin;
mod config;
mod context;
mod controller;
mod error;
mod exec;
mod progress;
mod scheduler;
mod signal;
mod summary;
mod thresholds;
mod thresholds_eval;
mod transport;
mod vu;

pub use builtin::{
    BuiltinMetrics, CHECKS, DATA_RECEIVED, DATA_SENT, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
    HTTP_REQS, ITERATION_DURATION, ITERATIONS, ITERATIONS_FAILED, ITERATIONS_INTERRUPTED, VUS,
    VUS_MAX, duration_ms,
};
pub use config::{
    DEFAULT_EXEC, DEFAULT_GRACEFUL_STOP, DEFAULT_MAX_DURATION, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_THRESHOLD_INTERVAL, MetricDecl, RunPlan, RunSettings, ScenarioConfig,
    ScenarioExecutor, ScenarioExecutorKind, ScenarioOptions, default_summary_trend_stats,
    resolve_scenarios,
};
pub use context::IterationContext;
pub use controller::{RunController, RunState};
pub use error::{Error, Result};
pub use exec::{Exec, ExecError, ExecFn, ExecFuture, ExecRegistry};
pub use progress::{ProgressFn, ProgressUpdate, ScenarioPhase, ScenarioProgress};
pub use scheduler::{ScenarioReport, SchedulerEvent};
pub use signal::StopSignal;
pub use summary::{
    AbortReason, CheckSummary, MetricSummary, RunStatus, RunSummary, summarize_checks,
    summarize_metrics,
};
pub use thresholds::{
    MetricSelector, Stat, ThresholdError, ThresholdExpr, ThresholdOp, ThresholdSet, ThresholdSpec,
    parse_selector, parse_threshold_expr, parse_trend_stats,
};
pub use thresholds_eval::{
    CompiledThreshold, ThresholdOutcome, ThresholdResult, compile_thresholds, evaluate_threshold,
    evaluate_thresholds, observed_value,
};
pub use transport::{
    HttpRequest, HttpResponse, Transport, TransportError, TransportErrorKind, TransportFuture,
};

pub use loadr_metrics as metrics;
