use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use loadr_core::metrics::MetricKind;
use loadr_core::{Exec, ExecError, HttpRequest, IterationContext, duration_ms};

use crate::checks::{Check, compile_check};
use crate::error::{Error, Result};
use crate::vars::Vars;
use crate::yaml::{ExecYaml, RequestYaml, YamlDuration};

/// A request exec with every placeholder already substituted.
#[derive(Debug, Clone)]
pub struct HttpExec {
    pub name: String,
    pub group: Option<String>,
    pub request: HttpRequest,
    pub think_time: Duration,
    pub trend: Option<String>,
    pub counters: Vec<String>,
    pub on_pass: Vec<String>,
    pub on_fail: Vec<String>,
    pub checks: Vec<Check>,
    needs_json: bool,
}

impl HttpExec {
    /// Custom metrics this exec writes, with the kind it writes them as.
    pub fn metric_uses(&self) -> impl Iterator<Item = (&str, MetricKind)> {
        let trend = self.trend.iter().map(|t| (t.as_str(), MetricKind::Trend));
        let counters = self
            .counters
            .iter()
            .chain(&self.on_pass)
            .chain(&self.on_fail)
            .map(|c| (c.as_str(), MetricKind::Counter));
        trend.chain(counters)
    }

    /// One iteration: send, record, check, count.
    pub async fn run(&self, ctx: IterationContext) -> std::result::Result<(), ExecError> {
        let ctx = match &self.group {
            Some(group) => ctx.group(group),
            None => ctx,
        };

        let res = ctx.request(self.request.clone()).await?;
        if let Some(trend) = &self.trend {
            ctx.trend(trend, duration_ms(res.duration))?;
        }

        let json: Option<serde_json::Value> = if self.needs_json {
            serde_json::from_slice(&res.body).ok()
        } else {
            None
        };

        let mut passed = true;
        for check in &self.checks {
            passed &= ctx.check(&check.name, check.rule.evaluate(&res, json.as_ref()));
        }

        for counter in &self.counters {
            ctx.counter(counter, 1)?;
        }
        let outcome = if passed { &self.on_pass } else { &self.on_fail };
        for counter in outcome {
            ctx.counter(counter, 1)?;
        }
        Ok(())
    }

    pub fn into_exec(self) -> Exec {
        let think_time = self.think_time;
        let this = Arc::new(self);
        Exec::new(move |ctx| {
            let this = this.clone();
            async move { this.run(ctx).await }
        })
        .with_think_time(think_time)
    }
}

fn build_url(exec: &str, req: &RequestYaml, base_url: Option<&str>, vars: &Vars) -> Result<String> {
    let context = format!("exec `{exec}` request");
    match (&req.url, &req.path) {
        (Some(url), None) => vars.substitute(url, &context),
        (None, Some(path)) => {
            let path = vars.substitute(path, &context)?;
            let base = base_url.ok_or_else(|| Error::MissingBaseUrl {
                exec: exec.to_string(),
            })?;
            let base = base.trim_end_matches('/');
            if path.starts_with('/') {
                Ok(format!("{base}{path}"))
            } else {
                Ok(format!("{base}/{path}"))
            }
        }
        (Some(_), Some(_)) => Err(Error::InvalidRequest {
            exec: exec.to_string(),
            reason: "set either `url` or `path`, not both".to_string(),
        }),
        (None, None) => Err(Error::InvalidRequest {
            exec: exec.to_string(),
            reason: "request needs `url` or `path`".to_string(),
        }),
    }
}

fn build_request(
    exec: &str,
    req: RequestYaml,
    base_url: Option<&str>,
    vars: &Vars,
) -> Result<HttpRequest> {
    let invalid = |reason: String| Error::InvalidRequest {
        exec: exec.to_string(),
        reason,
    };
    let context = format!("exec `{exec}` request");

    let url = build_url(exec, &req, base_url, vars)?;
    let method_name = req.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
    let method = http::Method::from_bytes(method_name.as_bytes())
        .map_err(|_| invalid(format!("invalid HTTP method `{method_name}`")))?;

    let mut request = HttpRequest::new(method, url);
    for (name, value) in &req.headers {
        request = request.header(name.clone(), vars.substitute(value, &context)?);
    }

    match (req.body, req.json) {
        (Some(_), Some(_)) => {
            return Err(invalid("set either `body` or `json`, not both".to_string()));
        }
        (Some(body), None) => request.body = Bytes::from(vars.substitute(&body, &context)?),
        (None, Some(json)) => {
            let json = vars.substitute_json(&json, &context)?;
            let body = serde_json::to_vec(&json)
                .map_err(|e| invalid(format!("failed to encode `json`: {e}")))?;
            request.body = Bytes::from(body);
            if !request
                .headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            {
                request = request.header("content-type", "application/json");
            }
        }
        (None, None) => {}
    }

    if let Some(name) = req.name {
        request = request.named(vars.substitute(&name, &context)?);
    }
    request.timeout = req.timeout.map(YamlDuration::into_inner);
    Ok(request)
}

pub(crate) fn compile_exec(
    name: &str,
    exec: ExecYaml,
    base_url: Option<&str>,
    vars: &Vars,
) -> Result<HttpExec> {
    let request = build_request(name, exec.request, base_url, vars)?;
    let checks = exec
        .checks
        .into_iter()
        .map(|c| compile_check(name, c, vars))
        .collect::<Result<Vec<_>>>()?;
    let needs_json = checks.iter().any(|c| c.rule.needs_json());

    Ok(HttpExec {
        name: name.to_string(),
        group: exec.group,
        request,
        think_time: exec
            .think_time
            .map(YamlDuration::into_inner)
            .unwrap_or_default(),
        trend: exec.trend,
        counters: exec.counters,
        on_pass: exec.on_pass,
        on_fail: exec.on_fail,
        checks,
        needs_json,
    })
}
