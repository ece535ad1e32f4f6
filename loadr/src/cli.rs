use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }

    // Bare integers are seconds.
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    humantime::parse_duration(s)
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"))
}

fn parse_env_pair(input: &str) -> Result<(String, String), String> {
    let (k, v) = input
        .split_once('=')
        .ok_or_else(|| format!("invalid --env (expected KEY=VALUE): {input}"))?;
    if k.is_empty() {
        return Err(format!("invalid --env (empty KEY): {input}"));
    }
    Ok((k.to_string(), v.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bars on stderr and a text summary on stdout.
    HumanReadable,
    /// A single JSON summary document on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "loadr",
    author,
    version,
    about = "Declarative HTTP load testing",
    long_about = "loadr runs declarative YAML load-test scripts.\n\nA script defines scenarios (virtual users running an exec for a duration), the HTTP request and checks of each exec, custom metrics and thresholds. The exit code reflects the threshold verdict.\n\nEnvironment variables of the current process override the script's `vars`; `--env KEY=VALUE` overrides both.",
    after_help = "Examples:\n  loadr run demos/product-catalog.yaml\n  loadr run demos/product-catalog.yaml --base-url http://127.0.0.1:8080 --env CATEGORY=laptops\n  loadr run demos/product-catalog.yaml --timeout 1m --output json --summary-export summary.json\n\nExit codes: 0 passed, 11 thresholds failed, 13 thresholds inconclusive, 30 invalid input, 40 runtime error."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test script
    #[command(
        long_about = "Run every scenario of a script, evaluate its thresholds and print a summary."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the script (.yaml)
    pub script: PathBuf,

    /// Add/override vars visible to the script (repeatable, KEY=VALUE).
    /// CLI-provided vars override the current process env.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Global deadline for the whole run (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Base URL for request paths (overrides BASE_URL and `baseUrl`)
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Also write the JSON summary to this file
    #[arg(long, value_name = "PATH")]
    pub summary_export: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(2 * 60 * 60)));
        assert_eq!(parse_duration("15"), Ok(Duration::from_secs(15)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn parse_env_pair_splits_on_first_equals() {
        assert_eq!(
            parse_env_pair("QUERY=a=b"),
            Ok(("QUERY".to_string(), "a=b".to_string()))
        );
        assert_eq!(
            parse_env_pair("EMPTY="),
            Ok(("EMPTY".to_string(), String::new()))
        );
        assert!(parse_env_pair("=x").is_err());
        assert!(parse_env_pair("NOVALUE").is_err());
    }

    #[test]
    fn cli_parses_run() {
        let parsed = Cli::try_parse_from([
            "loadr",
            "run",
            "catalog.yaml",
            "--env",
            "CATEGORY=laptops",
            "--env",
            "EMPTY=",
            "--timeout",
            "90s",
            "--base-url",
            "http://127.0.0.1:8080",
            "--output",
            "json",
            "--summary-export",
            "out/summary.json",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        let Command::Run(args) = cli.command;
        assert_eq!(args.script, PathBuf::from("catalog.yaml"));
        assert_eq!(
            args.env,
            vec![
                ("CATEGORY".to_string(), "laptops".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
        assert_eq!(args.timeout, Some(Duration::from_secs(90)));
        assert_eq!(args.base_url.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(args.output, OutputFormat::Json);
        assert_eq!(args.summary_export, Some(PathBuf::from("out/summary.json")));
    }

    #[test]
    fn cli_defaults_to_human_output() {
        let parsed = Cli::try_parse_from(["loadr", "run", "catalog.yaml"]);
        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };
        let Command::Run(args) = cli.command;
        assert_eq!(args.output, OutputFormat::HumanReadable);
        assert!(args.env.is_empty());
        assert_eq!(args.timeout, None);
    }
}
