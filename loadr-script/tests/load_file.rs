use std::io::Write as _;

use loadr_script::{Error, LoadOptions, Script};

const MINIMAL: &str = r#"
scenarios:
  smoke: { executor: per-vu-iterations, iterations: 1 }
execs:
  default:
    request: { url: "${TARGET}/health" }
    checks:
      - { name: ok, status: 200 }
"#;

#[tokio::test]
async fn loads_a_script_from_disk() {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap_or_else(|e| panic!("tempfile: {e}"));
    file.write_all(MINIMAL.as_bytes())
        .unwrap_or_else(|e| panic!("write: {e}"));

    let opts = LoadOptions {
        env_overrides: vec![("TARGET".to_string(), "http://127.0.0.1:9".to_string())],
        ..LoadOptions::default()
    };
    let script = Script::load(file.path(), &opts)
        .await
        .unwrap_or_else(|e| panic!("load: {e}"));

    assert_eq!(script.base_url, None);
    assert_eq!(script.execs[0].request.url, "http://127.0.0.1:9/health");
    assert!(script.plan.execs.contains("default"));
}

#[tokio::test]
async fn missing_files_and_undefined_vars_are_reported() {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let missing = dir.path().join("nope.yaml");
    assert!(matches!(
        Script::load(&missing, &LoadOptions::default()).await,
        Err(Error::Read { .. })
    ));

    assert!(matches!(
        Script::parse(MINIMAL, &LoadOptions::default()),
        Err(Error::UndefinedVar { name, .. }) if name == "TARGET"
    ));
    assert!(matches!(
        Script::parse("scenarios: [1, 2]\n", &LoadOptions::default()),
        Err(Error::Yaml(_))
    ));
}
