//! Configuration management
//!
//! The engine is configured entirely through environment variables:
//!
//! - `MNEMO_LLM_PROVIDER`: "openai" for any OpenAI-compatible endpoint,
//!   "none" to run without a model (heuristic planner only). Default "none".
//! - `MNEMO_LLM_BASE_URL`: API base, default `https://api.openai.com/v1`.
//! - `MNEMO_LLM_MODEL`: model id, default `gpt-4o-mini`.
//! - `MNEMO_LLM_API_KEY`: API key; falls back to `OPENAI_API_KEY`.
//! - `MNEMO_STATE_DB`: state-store path override, default `mnemo-state.db`.
//! - `MNEMO_RUNLOG_DIR`: run-log directory, default `runlogs`.
//! - `MNEMO_LOG`: log level (error, warn, info, debug, trace).
//! - `MNEMO_LOG_FORMAT`: "compact" (default) or "json"; read by the
//!   telemetry bootstrap, not by this struct.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// LLM provider configuration
    pub llm: LlmConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Path of the embedded state store
    #[serde(default = "default_state_db")]
    pub state_db: PathBuf,

    /// Directory receiving JSONL run logs
    #[serde(default = "default_runlog_dir")]
    pub runlog_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider selection: "openai" or "none"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// API key (not serialized)
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_state_db() -> PathBuf {
    PathBuf::from("mnemo-state.db")
}

fn default_runlog_dir() -> PathBuf {
    PathBuf::from("runlogs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_provider() -> String {
    "none".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig {
                state_db: default_state_db(),
                runlog_dir: default_runlog_dir(),
                log_level: default_log_level(),
            },
            llm: LlmConfig {
                provider: default_provider(),
                base_url: default_base_url(),
                model: default_model(),
                api_key: None,
            },
        }
    }
}

impl Config {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(v) = std::env::var("MNEMO_STATE_DB") {
            config.core.state_db = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MNEMO_RUNLOG_DIR") {
            config.core.runlog_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MNEMO_LOG") {
            config.core.log_level = v;
        }
        if let Ok(v) = std::env::var("MNEMO_LLM_PROVIDER") {
            config.llm.provider = v;
        }
        if let Ok(v) = std::env::var("MNEMO_LLM_BASE_URL") {
            config.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("MNEMO_LLM_MODEL") {
            config.llm.model = v;
        }
        config.llm.api_key = std::env::var("MNEMO_LLM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();

        config
    }

    /// True when a usable LLM provider is configured.
    pub fn llm_enabled(&self) -> bool {
        self.llm.provider == "openai" && self.llm.api_key.is_some()
    }
}
