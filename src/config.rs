//! Swarm configuration types and loading
//!
//! Configuration is YAML with a fallback chain (project-local file, user
//! config dir, built-in defaults). The API key never lives in the file;
//! the file names an environment variable and the key is resolved from it
//! at call time so rotated credentials are picked up without a restart.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};

/// Main swarm configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// LLM endpoint configuration
    pub llm: LlmConfig,

    /// Concurrency and iteration limits
    pub limits: LimitsConfig,

    /// Worker pool configuration
    pub workers: WorkersConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".codeswarm.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("codeswarm").join("codeswarm.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL (OpenAI-compatible)
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl LlmConfig {
    /// Resolve the API key from the configured environment variable
    pub fn get_api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .map_err(|_| eyre!("Environment variable {} is not set", self.api_key_env))
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com".to_string(),
            temperature: 0.3,
            max_tokens: 4096,
            timeout_ms: 300_000,
        }
    }
}

/// Concurrency and iteration limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent LLM calls per limiter
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: usize,

    /// Maximum LLM calls in any rolling one-hour window, per limiter
    #[serde(rename = "max-calls-per-hour")]
    pub max_calls_per_hour: usize,

    /// Maximum attempts per subtask before it fails permanently
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Maximum orchestrator main-loop iterations per build
    #[serde(rename = "max-orchestrator-iterations")]
    pub max_orchestrator_iterations: u32,

    /// Maximum tool loops per worker run
    #[serde(rename = "max-tool-loops")]
    pub max_tool_loops: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_calls_per_hour: 120,
            max_attempts: 3,
            max_orchestrator_iterations: 50,
            max_tool_loops: 20,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkersConfig {
    /// Number of parallel worker slots
    pub count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { count: 3 }
    }
}

/// What changed in a runtime config update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigDelta {
    /// max-concurrent or max-calls-per-hour changed (rate limiters rebind)
    pub limits_changed: bool,
    /// api-key-env, base-url or model changed (transport re-reads per call)
    pub credentials_changed: bool,
}

/// Runtime-mutable shared configuration handle
///
/// Cheap to clone; every reader snapshots at call time, so updates apply to
/// the next call without tearing an in-flight one.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Clone the current configuration
    pub fn snapshot(&self) -> Config {
        self.inner.read().expect("config lock poisoned").clone()
    }

    /// Apply a mutation and report what changed
    pub fn update<F: FnOnce(&mut Config)>(&self, apply: F) -> ConfigDelta {
        let mut config = self.inner.write().expect("config lock poisoned");
        let before = config.clone();
        apply(&mut config);

        ConfigDelta {
            limits_changed: before.limits.max_concurrent != config.limits.max_concurrent
                || before.limits.max_calls_per_hour != config.limits.max_calls_per_hour,
            credentials_changed: before.llm.api_key_env != config.llm.api_key_env
                || before.llm.base_url != config.llm.base_url
                || before.llm.model != config.llm.model,
        }
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
