use std::path::Path;

use loadr_core::metrics::MetricUnit;
use loadr_core::{
    ExecRegistry, MetricDecl, RunPlan, RunSettings, ScenarioOptions, ThresholdSet, ThresholdSpec,
    parse_trend_stats,
};

use crate::error::{Error, Result};
use crate::exec::{HttpExec, compile_exec};
use crate::vars::{LoadOptions, Vars};
use crate::yaml::{ScenarioYaml, ScriptYaml, ThresholdItemYaml, ThresholdsYaml, YamlDuration};

/// A parsed script, ready to run.
#[derive(Debug, Clone)]
pub struct Script {
    pub plan: RunPlan,
    pub base_url: Option<String>,
    pub vars: Vars,
    /// Execs in document order.
    pub execs: Vec<HttpExec>,
}

impl Script {
    pub fn parse(src: &str, opts: &LoadOptions) -> Result<Self> {
        let doc: ScriptYaml = serde_yaml::from_str(src)?;
        compile(doc, opts)
    }

    pub async fn load(path: &Path, opts: &LoadOptions) -> Result<Self> {
        let src = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Error::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let script = Self::parse(&src, opts)?;
        tracing::debug!(
            path = %path.display(),
            scenarios = script.plan.scenarios.len(),
            execs = script.execs.len(),
            base_url = script.base_url.as_deref().unwrap_or(""),
            "script loaded"
        );
        Ok(script)
    }
}

fn scenario_options(name: String, s: ScenarioYaml) -> ScenarioOptions {
    ScenarioOptions {
        name,
        executor: s.executor,
        exec: s.exec,
        vus: s.vus,
        duration: s.duration.map(YamlDuration::into_inner),
        iterations: s.iterations,
        max_duration: s.max_duration.map(YamlDuration::into_inner),
        start_time: s.start_time.map(YamlDuration::into_inner),
        graceful_stop: s.graceful_stop.map(YamlDuration::into_inner),
        tags: s.tags.into_iter().collect(),
    }
}

fn threshold_set(selector: String, raw: ThresholdsYaml) -> ThresholdSet {
    let thresholds = raw
        .into_items()
        .into_iter()
        .map(|item| match item {
            ThresholdItemYaml::Expr(expression) => ThresholdSpec::new(expression),
            ThresholdItemYaml::Full(obj) => ThresholdSpec {
                expression: obj.threshold,
                abort_on_fail: obj.abort_on_fail,
                delay_abort_eval: obj.delay_abort_eval.map(YamlDuration::into_inner),
            },
        })
        .collect();
    ThresholdSet {
        selector,
        thresholds,
    }
}

/// Declared metrics first, then metrics only named by execs. A conflicting kind is an error.
fn metric_decls(doc_metrics: Vec<(String, crate::yaml::MetricYaml)>, execs: &[HttpExec]) -> Result<Vec<MetricDecl>> {
    let mut decls: Vec<MetricDecl> = doc_metrics
        .into_iter()
        .map(|(name, m)| MetricDecl {
            name,
            kind: m.kind,
            unit: m.unit,
        })
        .collect();

    for exec in execs {
        for (name, kind) in exec.metric_uses() {
            match decls.iter().find(|d| d.name == name) {
                Some(d) if d.kind != kind => {
                    return Err(Error::MetricKindConflict {
                        name: name.to_string(),
                        declared: d.kind,
                        used: kind,
                        exec: exec.name.clone(),
                    });
                }
                Some(_) => {}
                None => decls.push(MetricDecl {
                    name: name.to_string(),
                    kind,
                    unit: if exec.trend.as_deref() == Some(name) {
                        MetricUnit::Time
                    } else {
                        MetricUnit::Default
                    },
                }),
            }
        }
    }
    Ok(decls)
}

fn compile(doc: ScriptYaml, opts: &LoadOptions) -> Result<Script> {
    let ScriptYaml {
        base_url,
        vars,
        metrics,
        scenarios,
        thresholds,
        execs,
        request_timeout,
        max_trend_samples,
        summary_trend_stats,
    } = doc;

    let (vars, base_url) = Vars::resolve(vars, base_url.as_deref(), opts);

    let compiled: Vec<HttpExec> = execs
        .into_iter()
        .map(|(name, exec)| compile_exec(&name, exec, base_url.as_deref(), &vars))
        .collect::<Result<_>>()?;

    let mut registry = ExecRegistry::default();
    for exec in &compiled {
        registry.insert(exec.name.clone(), exec.clone().into_exec());
    }

    let mut settings = RunSettings::default();
    if let Some(timeout) = request_timeout {
        settings.request_timeout = timeout.into_inner();
    }
    if let Some(max) = max_trend_samples {
        settings.max_trend_samples = max;
    }
    if let Some(stats) = summary_trend_stats {
        settings.summary_trend_stats = parse_trend_stats(&stats)?;
    }

    let plan = RunPlan {
        scenarios: scenarios
            .into_iter()
            .map(|(name, s)| scenario_options(name, s))
            .collect(),
        execs: registry,
        metrics: metric_decls(metrics, &compiled)?,
        thresholds: thresholds
            .into_iter()
            .map(|(selector, raw)| threshold_set(selector, raw))
            .collect(),
        settings,
    };

    Ok(Script {
        plan,
        base_url,
        vars,
        execs: compiled,
    })
}
