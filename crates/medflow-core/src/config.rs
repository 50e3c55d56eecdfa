use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Top-level medflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FlowError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| FlowError::Config(format!("invalid config: {e}")))
    }
}

/// Runner limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard cap on node visits per run; tripping it is a run-level error.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Overall run timeout in seconds.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            run_timeout_secs: default_run_timeout(),
        }
    }
}

/// Consultation pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Candidates requested from each search call.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound on candidates kept after filtering.
    #[serde(default = "default_max_selected")]
    pub max_selected: usize,
    /// Candidate counts at or below this skip the filtering model entirely.
    #[serde(default = "default_min_candidates_to_filter")]
    pub min_candidates_to_filter: usize,
    /// Retrieval retry cap for the orchestration loop (distinct from
    /// node-local retries).
    #[serde(default = "default_retrieve_attempt_cap")]
    pub retrieve_attempt_cap: u32,
    /// Maximum follow-up questions returned to the user.
    #[serde(default = "default_followup_cap")]
    pub followup_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_selected: default_max_selected(),
            min_candidates_to_filter: default_min_candidates_to_filter(),
            retrieve_attempt_cap: default_retrieve_attempt_cap(),
            followup_cap: default_followup_cap(),
        }
    }
}

/// Language-model endpoint settings (OpenAI-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Model used when a node asks for `fast_mode`.
    #[serde(default = "default_fast_model")]
    pub fast_model: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            fast_model: default_fast_model(),
            max_tokens: default_llm_max_tokens(),
            request_timeout_secs: default_request_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Node-local retry settings for transient upstream failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// User-memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// How many relevant memories to retrieve per run.
    #[serde(default = "default_relevant_top_n")]
    pub relevant_top_n: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            relevant_top_n: default_relevant_top_n(),
        }
    }
}

fn default_max_steps() -> usize {
    32
}
fn default_run_timeout() -> u64 {
    120
}
fn default_top_k() -> usize {
    20
}
fn default_max_selected() -> usize {
    10
}
fn default_min_candidates_to_filter() -> usize {
    3
}
fn default_retrieve_attempt_cap() -> u32 {
    2
}
fn default_followup_cap() -> usize {
    3
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "MEDFLOW_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_fast_model() -> String {
    "gpt-4o-mini".into()
}
fn default_llm_max_tokens() -> u32 {
    2048
}
fn default_request_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8_000
}
fn default_db_path() -> String {
    "medflow.db".into()
}
fn default_relevant_top_n() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.max_steps, 32);
        assert_eq!(cfg.pipeline.retrieve_attempt_cap, 2);
        assert_eq!(cfg.pipeline.followup_cap, 3);
        assert_eq!(cfg.llm.retry.max_retries, 2);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [pipeline]
            top_k = 8

            [llm]
            model = "local-model"
            base_url = "http://localhost:11434/v1"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.pipeline.top_k, 8);
        assert_eq!(cfg.pipeline.max_selected, 10);
        assert_eq!(cfg.llm.model, "local-model");
        assert_eq!(cfg.llm.fast_model, "gpt-4o-mini");
        assert_eq!(cfg.engine.max_steps, 32);
    }
}
