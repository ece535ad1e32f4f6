use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use loadr_core::{RunController, RunSummary};
use loadr_http::HttpClient;
use loadr_script::{LoadOptions, Script};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let opts = LoadOptions {
        env_overrides: args.env.clone(),
        base_url: args.base_url.clone(),
        ..LoadOptions::from_process_env()
    };
    let script = Script::load(&args.script, &opts)
        .await
        .map_err(RunError::from_script)?;

    let mut plan = script.plan;
    plan.settings.timeout = args.timeout;

    let transport = Arc::new(HttpClient::default());
    let mut controller = RunController::new(plan, transport)
        .map_err(|e| RunError::from_core("invalid run plan", e))?;

    out.print_header(&args.script, controller.scenarios());
    if let Some(progress) = out.progress(controller.scenarios()) {
        controller = controller.with_progress(progress);
    }
    let controller = Arc::new(controller);

    let interrupt = tokio::spawn({
        let controller = controller.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, stopping scenarios");
                controller.cancel();
            }
        }
    });

    let result = controller.run().await;
    interrupt.abort();
    let summary = result.map_err(|e| RunError::from_core("run failed", e))?;

    out.print_summary(&summary)
        .context("failed to print summary")
        .map_err(RunError::RuntimeError)?;

    if let Some(path) = &args.summary_export {
        export_summary(path, &summary)
            .await
            .map_err(RunError::RuntimeError)?;
    }

    Ok(ExitCode::from_status(summary.status))
}

async fn export_summary(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(summary).context("failed to encode summary")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create summary export dir: {}", parent.display()))?;
    }
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write summary export: {}", path.display()))
}
