use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::context::IterationContext;
use crate::transport::TransportError;

pub type ExecFuture = Pin<Box<dyn Future<Output = Result<(), ExecError>> + Send>>;

/// One iteration of a scenario's target function.
pub type ExecFn = Arc<dyn Fn(IterationContext) -> ExecFuture + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("request failed: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Metrics(#[from] loadr_metrics::Error),

    #[error("{0}")]
    Script(String),
}

impl ExecError {
    pub fn script(msg: impl Into<String>) -> Self {
        Self::Script(msg.into())
    }
}

/// A target function plus the think time a worker pauses for after each iteration.
#[derive(Clone)]
pub struct Exec {
    pub func: ExecFn,
    pub think_time: Duration,
}

impl Exec {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ExecError>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |ctx| Box::pin(f(ctx))),
            think_time: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }
}

impl std::fmt::Debug for Exec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exec")
            .field("think_time", &self.think_time)
            .finish_non_exhaustive()
    }
}

/// Named target functions scenarios can refer to.
#[derive(Debug, Clone, Default)]
pub struct ExecRegistry {
    execs: HashMap<String, Exec>,
}

impl ExecRegistry {
    pub fn insert(&mut self, name: impl Into<String>, exec: Exec) -> Option<Exec> {
        self.execs.insert(name.into(), exec)
    }

    pub fn get(&self, name: &str) -> Option<&Exec> {
        self.execs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.execs.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.execs.is_empty()
    }
}
