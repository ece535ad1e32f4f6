use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use loadr_metrics::{MetricId, MetricUnit, Registry, Sample, SampleValue, TagSet};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::builtin::{BuiltinMetrics, duration_ms};
use crate::exec::ExecError;
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Per-run state shared by every worker.
#[derive(Debug)]
pub(crate) struct RunEnv {
    pub(crate) metrics: Arc<Registry>,
    pub(crate) builtin: BuiltinMetrics,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) request_timeout: Duration,
    pub(crate) started: Instant,
}

impl RunEnv {
    /// Offset from run start, used as sample timestamp.
    pub(crate) fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.started)
    }
}

/// Identity of one virtual user.
#[derive(Debug)]
pub(crate) struct VuIdentity {
    pub(crate) vu_id: u64,
    pub(crate) scenario: Arc<str>,
    pub(crate) scenario_tags: Arc<[(String, String)]>,
    pub(crate) env: Arc<RunEnv>,
}

impl VuIdentity {
    /// Scenario-level tags, then `scenario`, then `extra`. Later keys win.
    pub(crate) fn tags(&self, extra: &[(&str, &str)]) -> TagSet {
        let mut pairs: Vec<(&str, &str)> =
            Vec::with_capacity(self.scenario_tags.len() + 1 + extra.len());
        pairs.extend(
            self.scenario_tags
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        pairs.push(("scenario", self.scenario.as_ref()));
        pairs.extend_from_slice(extra);
        self.env.metrics.resolve_tags(&pairs)
    }

    pub(crate) fn sample(&self, metric: MetricId, tags: TagSet, value: SampleValue) -> Sample {
        Sample {
            metric,
            tags,
            value,
            at: self.env.elapsed(),
        }
    }
}

/// Samples produced by one iteration.
#[derive(Debug, Default)]
pub(crate) struct IterationBuffer {
    /// Committed only when the iteration succeeds.
    pub(crate) samples: Vec<Sample>,
    /// Committed whatever the iteration outcome (requests that never got a response).
    pub(crate) always: Vec<Sample>,
}

/// Handle a target function uses to issue requests and record metrics.
///
/// Everything recorded through the context is buffered and reaches the metric sink only when the
/// iteration returns `Ok`. Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct IterationContext {
    vu: Arc<VuIdentity>,
    iteration: u64,
    group: Option<Arc<str>>,
    buffer: Arc<Mutex<IterationBuffer>>,
}

impl IterationContext {
    pub(crate) fn new(vu: Arc<VuIdentity>, iteration: u64) -> Self {
        Self {
            vu,
            iteration,
            group: None,
            buffer: Arc::default(),
        }
    }

    pub(crate) fn take_buffer(&self) -> IterationBuffer {
        std::mem::take(&mut *self.buffer.lock())
    }

    pub fn scenario(&self) -> &str {
        &self.vu.scenario
    }

    /// Run-wide id of this virtual user, starting at 1.
    pub fn vu_id(&self) -> u64 {
        self.vu.vu_id
    }

    /// Zero-based iteration number of this virtual user.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn current_group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// A context whose samples carry a `group` tag. Nested groups join with `::`.
    #[must_use]
    pub fn group(&self, name: &str) -> Self {
        let path = match &self.group {
            Some(parent) => format!("{parent}::{name}"),
            None => format!("::{name}"),
        };
        Self {
            group: Some(Arc::from(path)),
            ..self.clone()
        }
    }

    fn tags(&self, extra: &[(&str, &str)]) -> TagSet {
        match &self.group {
            Some(group) => {
                let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(extra.len() + 1);
                pairs.push(("group", group.as_ref()));
                pairs.extend_from_slice(extra);
                self.vu.tags(&pairs)
            }
            None => self.vu.tags(extra),
        }
    }

    fn push(&self, metric: MetricId, tags: TagSet, value: SampleValue) {
        let sample = self.vu.sample(metric, tags, value);
        self.buffer.lock().samples.push(sample);
    }

    /// Sends a request and records the request metrics.
    ///
    /// A transport failure (including the request timeout) is returned as an error. Its
    /// `http_reqs` and `http_req_failed` samples are kept even if the iteration then fails.
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse, ExecError> {
        let env = &self.vu.env;
        let timeout = req.timeout.unwrap_or(env.request_timeout);
        let method = req.method.to_string();
        let name = req.tag_name().to_string();

        let res = match tokio::time::timeout(timeout, env.transport.request(req)).await {
            Ok(res) => res,
            Err(_) => Err(TransportError::timeout(timeout)),
        };

        let b = &env.builtin;
        match res {
            Ok(res) => {
                let status = res.status.to_string();
                let tags = self.tags(&[
                    ("method", method.as_str()),
                    ("name", name.as_str()),
                    ("status", status.as_str()),
                ]);

                self.push(b.http_reqs, tags.clone(), SampleValue::Counter(1));
                self.push(
                    b.http_req_duration,
                    tags.clone(),
                    SampleValue::Trend(duration_ms(res.duration)),
                );
                self.push(
                    b.http_req_failed,
                    tags.clone(),
                    SampleValue::Rate(res.is_failure()),
                );
                self.push(b.data_sent, tags.clone(), SampleValue::Counter(res.bytes_sent));
                self.push(
                    b.data_received,
                    tags,
                    SampleValue::Counter(res.bytes_received),
                );
                Ok(res)
            }
            Err(err) => {
                let error_code = err.kind.to_string();
                let tags = self.tags(&[
                    ("error_code", error_code.as_str()),
                    ("method", method.as_str()),
                    ("name", name.as_str()),
                ]);
                tracing::debug!(
                    scenario = %self.vu.scenario,
                    vu = self.vu.vu_id,
                    url = %name,
                    error = %err,
                    "request failed"
                );

                let reqs = self
                    .vu
                    .sample(b.http_reqs, tags.clone(), SampleValue::Counter(1));
                let failed = self
                    .vu
                    .sample(b.http_req_failed, tags, SampleValue::Rate(true));
                self.buffer.lock().always.extend([reqs, failed]);
                Err(ExecError::Transport(err))
            }
        }
    }

    pub async fn get(&self, url: impl Into<String>) -> Result<HttpResponse, ExecError> {
        self.request(HttpRequest::get(url)).await
    }

    pub async fn post(
        &self,
        url: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Result<HttpResponse, ExecError> {
        self.request(HttpRequest::post(url, body)).await
    }

    /// Records a named check into the `checks` rate and returns `passed`.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        let tags = self.tags(&[("check", name)]);
        self.push(self.vu.env.builtin.checks, tags, SampleValue::Rate(passed));
        passed
    }

    pub fn counter(&self, name: &str, n: u64) -> Result<(), ExecError> {
        self.record(name, SampleValue::Counter(n), &[])
    }

    pub fn gauge(&self, name: &str, value: f64) -> Result<(), ExecError> {
        self.record(name, SampleValue::Gauge(value), &[])
    }

    pub fn rate(&self, name: &str, hit: bool) -> Result<(), ExecError> {
        self.record(name, SampleValue::Rate(hit), &[])
    }

    pub fn trend(&self, name: &str, value: f64) -> Result<(), ExecError> {
        self.record(name, SampleValue::Trend(value), &[])
    }

    /// Records a sample into a custom metric. Unknown metrics are registered on first use with the
    /// sample's kind; a kind that differs from the declared one is an error.
    pub fn record(
        &self,
        name: &str,
        value: SampleValue,
        tags: &[(&str, &str)],
    ) -> Result<(), ExecError> {
        let metrics = &self.vu.env.metrics;
        let metric = match metrics.lookup(name) {
            Some((id, def)) if def.kind == value.kind() => id,
            Some((_, def)) => {
                return Err(loadr_metrics::Error::SampleKind {
                    name: name.to_string(),
                    metric: def.kind,
                    sample: value.kind(),
                }
                .into());
            }
            None => metrics.register(name, value.kind(), MetricUnit::Default)?,
        };

        self.push(metric, self.tags(tags), value);
        Ok(())
    }

    /// Pauses inside the iteration. Unlike think time this is not cut short by a scenario stop.
    pub async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::transport::TransportFuture;

    /// Transport answering every request with a fixed status after `latency`.
    #[derive(Debug)]
    pub(crate) struct FixedTransport {
        pub(crate) status: u16,
        pub(crate) latency: Duration,
    }

    impl Transport for FixedTransport {
        fn request(&self, _req: HttpRequest) -> TransportFuture<'_> {
            Box::pin(async move {
                tokio::time::sleep(self.latency).await;
                Ok(HttpResponse {
                    status: self.status,
                    headers: Vec::new(),
                    body: Bytes::from_static(b"[]"),
                    duration: self.latency,
                    bytes_sent: 10,
                    bytes_received: 20,
                })
            })
        }
    }

    pub(crate) fn run_env(transport: Arc<dyn Transport>) -> Arc<RunEnv> {
        let metrics = Arc::new(Registry::default());
        let builtin =
            BuiltinMetrics::register(&metrics).unwrap_or_else(|e| panic!("register: {e}"));
        Arc::new(RunEnv {
            metrics,
            builtin,
            transport,
            request_timeout: Duration::from_secs(1),
            started: Instant::now(),
        })
    }

    pub(crate) fn vu(env: Arc<RunEnv>, scenario: &str) -> Arc<VuIdentity> {
        Arc::new(VuIdentity {
            vu_id: 1,
            scenario: Arc::from(scenario),
            scenario_tags: Arc::from(vec![("team".to_string(), "catalog".to_string())]),
            env,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn request_buffers_samples_until_taken() {
        let env = run_env(Arc::new(FixedTransport {
            status: 503,
            latency: Duration::from_millis(100),
        }));
        let ctx = IterationContext::new(vu(env.clone(), "s"), 0);

        let res = ctx
            .group("list")
            .get("http://catalog/products")
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(res.status, 503);
        assert!(!ctx.check("is 2xx", false));

        // Nothing reaches the sink before commit.
        assert!(env.metrics.query(env.builtin.http_reqs).snapshot().is_none());

        let buffer = ctx.take_buffer();
        assert_eq!(buffer.samples.len(), 6);
        assert!(buffer.always.is_empty());

        let failed = buffer
            .samples
            .iter()
            .find(|s| s.metric == env.builtin.http_req_failed)
            .unwrap_or_else(|| panic!("missing http_req_failed sample"));
        assert_eq!(failed.value, SampleValue::Rate(true));
        assert!(failed.at >= Duration::from_millis(100));

        let tags = env.metrics.tags_to_strings(&failed.tags);
        for expected in [
            ("group", "::list"),
            ("scenario", "s"),
            ("status", "503"),
            ("team", "catalog"),
        ] {
            assert!(
                tags.iter().any(|(k, v)| k == expected.0 && v == expected.1),
                "missing {expected:?} in {tags:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_is_a_transport_failure() {
        let env = run_env(Arc::new(FixedTransport {
            status: 200,
            latency: Duration::from_secs(5),
        }));
        let ctx = IterationContext::new(vu(env.clone(), "s"), 0);

        let err = ctx
            .get("http://catalog/slow")
            .await
            .err()
            .unwrap_or_else(|| panic!("expected timeout"));
        assert!(matches!(err, ExecError::Transport(_)));

        let buffer = ctx.take_buffer();
        assert!(buffer.samples.is_empty());
        assert_eq!(buffer.always.len(), 2);
    }

    #[tokio::test]
    async fn custom_metrics_register_on_first_use_and_keep_their_kind() {
        let env = run_env(Arc::new(FixedTransport {
            status: 200,
            latency: Duration::ZERO,
        }));
        let ctx = IterationContext::new(vu(env.clone(), "s"), 0);

        ctx.counter("success_count", 1)
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(env.metrics.lookup("success_count").is_some());
        assert!(ctx.trend("success_count", 1.0).is_err());
        assert!(ctx.trend("http_req_duration", 12.5).is_ok());
    }

    #[test]
    fn nested_groups_join_paths() {
        let env = run_env(Arc::new(FixedTransport {
            status: 200,
            latency: Duration::ZERO,
        }));
        let ctx = IterationContext::new(vu(env, "s"), 3);
        let inner = ctx.group("a").group("b");
        assert_eq!(inner.current_group(), Some("::a::b"));
        assert_eq!(inner.iteration(), 3);
        assert_eq!(ctx.current_group(), None);
    }
}
