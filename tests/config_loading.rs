use std::io::Write;

use medflow_core::config::AppConfig;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
max_steps = 24
run_timeout_secs = 90

[pipeline]
top_k = 15
max_selected = 8
min_candidates_to_filter = 2
retrieve_attempt_cap = 3
followup_cap = 2

[llm]
base_url = "http://localhost:8080/v1"
api_key_env = "TEST_API_KEY"
model = "main-model"
fast_model = "small-model"
max_tokens = 1024
request_timeout_secs = 30

[llm.retry]
max_retries = 1
initial_backoff_ms = 100
max_backoff_ms = 2000

[memory]
db_path = "/tmp/medflow-test/memories.db"
relevant_top_n = 5
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_steps, 24);
    assert_eq!(config.engine.run_timeout_secs, 90);
    assert_eq!(config.pipeline.top_k, 15);
    assert_eq!(config.pipeline.retrieve_attempt_cap, 3);
    assert_eq!(config.llm.base_url, "http://localhost:8080/v1");
    assert_eq!(config.llm.api_key_env, "TEST_API_KEY");
    assert_eq!(config.llm.fast_model, "small-model");
    assert_eq!(config.llm.retry.max_retries, 1);
    assert_eq!(config.memory.relevant_top_n, 5);
}

#[test]
fn test_partial_config_fills_defaults() {
    let toml_content = r#"
[llm]
model = "custom-model"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.llm.model, "custom-model");
    // Everything unspecified falls back to the documented defaults.
    assert_eq!(config.engine.max_steps, 32);
    assert_eq!(config.pipeline.top_k, 20);
    assert_eq!(config.pipeline.retrieve_attempt_cap, 2);
    assert_eq!(config.pipeline.min_candidates_to_filter, 3);
}

#[test]
fn test_missing_file_is_a_config_error() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/medflow.toml")).unwrap_err();
    assert!(matches!(err, medflow_core::error::FlowError::Config(_)));
}
