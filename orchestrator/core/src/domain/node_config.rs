// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for a Vigil node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Storage, bus and pattern-memory settings
// - Cost router thresholds and budget ceiling
// - Retry policy and worker pool sizing
// - Worker capability per tier and the verification command

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const API_VERSION: &str = "vigil/v1";
pub const KIND: &str = "VigilConfig";
pub const CONFIG_PATH_ENV: &str = "VIGIL_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "vigil-config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Environment variable '{0}' referenced by config is not set")]
    MissingEnv(String),
}

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    /// API version (must be "vigil/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "VigilConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: VigilConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Node configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfigSpec {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub patterns: PatternConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub dag: DagConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Embedded sled database under `data_dir`
    Sled,
    /// Nothing survives a restart; development and tests only
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Unacknowledged deliveries become visible again after this long
    #[serde(default = "default_visibility_timeout", with = "humantime_serde")]
    pub visibility_timeout: Duration,

    /// Upper bound on how long an idle subscriber waits before rechecking
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: default_visibility_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    /// EMA weight of new evidence
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,

    /// Enable the embedding-based semantic tier
    #[serde(default)]
    pub semantic_search: bool,

    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Patterns handed to the planner per signal
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            smoothing: default_smoothing(),
            semantic_search: false,
            min_similarity: default_min_similarity(),
            embedding_dimensions: default_embedding_dimensions(),
            query_limit: default_query_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// MEDIUM severity goes to the cloud tier only above this complexity
    #[serde(default = "default_medium_threshold")]
    pub medium_complexity_threshold: f64,

    /// Spend allowed per accounting period before tier selection is forced local
    #[serde(default = "default_budget_ceiling")]
    pub budget_ceiling: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            medium_complexity_threshold: default_medium_threshold(),
            budget_ceiling: default_budget_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagConfig {
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            max_tasks: default_max_tasks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_pool_size")]
    pub worker_pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_timeout", with = "humantime_serde")]
    pub base_timeout: Duration,

    /// Timeout multipliers for retry 1, 2, ...
    #[serde(default = "default_multipliers")]
    pub multipliers: Vec<f64>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff before a retry, scaled by the retry's multiplier
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_timeout: default_base_timeout(),
            multipliers: default_multipliers(),
            max_retries: default_max_retries(),
            backoff: default_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Remediation branches planned from matched patterns
    #[serde(default = "default_max_remediations")]
    pub max_remediations: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_remediations: default_max_remediations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_local_worker")]
    pub local: WorkerConfig,

    #[serde(default = "default_cloud_worker")]
    pub cloud: WorkerConfig,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            local: default_local_worker(),
            cloud: default_cloud_worker(),
        }
    }
}

/// Concrete implementation serving one tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerConfig {
    /// Deterministic in-process worker
    Stub {
        #[serde(default = "default_stub_name")]
        name: String,
        /// Task keys the stub fails on
        #[serde(default)]
        fail_keys: Vec<String>,
        #[serde(default)]
        cost_per_task: f64,
    },
    Ollama {
        endpoint: String,
        model: String,
        #[serde(default)]
        cost_per_1k_tokens: f64,
    },
    OpenAI {
        endpoint: String,
        /// Supports "env:VAR_NAME"
        api_key: String,
        model: String,
        #[serde(default)]
        cost_per_1k_tokens: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VerificationConfig {
    /// Fixed verdict; useful for dry runs
    Static {
        #[serde(default = "default_true")]
        passed: bool,
    },
    /// Run the project's test command and parse failing tests
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
}

impl Default for VerificationConfig {
    fn default() -> Self {
        VerificationConfig::Static { passed: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Sled
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./vigil-data")
}

fn default_visibility_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_smoothing() -> f64 {
    vigil_cortex::DEFAULT_SMOOTHING
}

fn default_min_similarity() -> f64 {
    0.75
}

fn default_embedding_dimensions() -> usize {
    256
}

fn default_query_limit() -> usize {
    5
}

fn default_medium_threshold() -> f64 {
    0.6
}

fn default_budget_ceiling() -> f64 {
    25.0
}

fn default_max_tasks() -> usize {
    32
}

fn default_pool_size() -> usize {
    4
}

fn default_base_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_multipliers() -> Vec<f64> {
    vec![2.0, 3.0, 5.0, 10.0]
}

fn default_max_retries() -> u32 {
    4
}

fn default_backoff() -> Duration {
    Duration::from_millis(250)
}

fn default_max_remediations() -> usize {
    3
}

fn default_stub_name() -> String {
    "stub".to_string()
}

fn default_local_worker() -> WorkerConfig {
    WorkerConfig::Stub {
        name: "stub-local".to_string(),
        fail_keys: vec![],
        cost_per_task: 0.0,
    }
}

fn default_cloud_worker() -> WorkerConfig {
    WorkerConfig::Stub {
        name: "stub-cloud".to_string(),
        fail_keys: vec![],
        cost_per_task: 0.01,
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8700
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "vigil-node".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: VigilConfigSpec::default(),
        }
    }
}

impl VigilConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. VIGIL_CONFIG_PATH environment variable
    /// 2. ./vigil-config.yaml (working directory)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from(format!("./{}", DEFAULT_CONFIG_FILE));
        if cwd.exists() {
            return Some(cwd);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!(path = %path.display(), "Loading configuration from explicit path");
            let mut config = Self::from_yaml_file(&path)?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration from discovered path");
                Self::from_yaml_file(path)?
            }
            None => {
                tracing::warn!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Container deployments override selected values through the environment
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("VIGIL_DATA_DIR") {
            tracing::info!(data_dir = %dir, "Environment override: VIGIL_DATA_DIR");
            self.spec.storage.data_dir = PathBuf::from(dir);
        }

        if let Ok(val) = std::env::var("VIGIL_API_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!(port, "Environment override: VIGIL_API_PORT");
                    self.spec.api.port = port;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for VIGIL_API_PORT: '{}'. Expected a port number. Ignoring.",
                    val
                ),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.api_version != API_VERSION {
            return invalid(format!("apiVersion '{}' must be '{}'", self.api_version, API_VERSION));
        }
        if self.kind != KIND {
            return invalid(format!("kind '{}' must be '{}'", self.kind, KIND));
        }
        if self.metadata.name.trim().is_empty() {
            return invalid("metadata.name cannot be empty".into());
        }

        let spec = &self.spec;
        if !(0.0..=1.0).contains(&spec.patterns.smoothing) {
            return invalid(format!("patterns.smoothing must be in [0, 1], got {}", spec.patterns.smoothing));
        }
        if !(0.0..=1.0).contains(&spec.patterns.min_similarity) {
            return invalid(format!(
                "patterns.min_similarity must be in [0, 1], got {}",
                spec.patterns.min_similarity
            ));
        }
        if spec.patterns.semantic_search && spec.patterns.embedding_dimensions == 0 {
            return invalid("patterns.embedding_dimensions must be positive".into());
        }
        if !(0.0..=1.0).contains(&spec.router.medium_complexity_threshold) {
            return invalid(format!(
                "router.medium_complexity_threshold must be in [0, 1], got {}",
                spec.router.medium_complexity_threshold
            ));
        }
        if !spec.router.budget_ceiling.is_finite() || spec.router.budget_ceiling < 0.0 {
            return invalid(format!("router.budget_ceiling must be non-negative, got {}", spec.router.budget_ceiling));
        }
        if spec.dag.max_tasks == 0 {
            return invalid("dag.max_tasks must be at least 1".into());
        }
        if spec.engine.worker_pool_size == 0 {
            return invalid("engine.worker_pool_size must be at least 1".into());
        }
        if spec.retry.base_timeout.is_zero() {
            return invalid("retry.base_timeout must be positive".into());
        }
        if (spec.retry.max_retries as usize) > spec.retry.multipliers.len() {
            return invalid(format!(
                "retry.max_retries ({}) exceeds the number of multipliers ({})",
                spec.retry.max_retries,
                spec.retry.multipliers.len()
            ));
        }
        if spec.retry.multipliers.iter().any(|m| !m.is_finite() || *m < 1.0) {
            return invalid("retry.multipliers must all be >= 1".into());
        }
        if spec.bus.visibility_timeout.is_zero() || spec.bus.poll_interval.is_zero() {
            return invalid("bus timeouts must be positive".into());
        }

        for (tier, worker) in [("local", &spec.workers.local), ("cloud", &spec.workers.cloud)] {
            match worker {
                WorkerConfig::Stub { cost_per_task, .. } if *cost_per_task < 0.0 => {
                    return invalid(format!("workers.{}.cost_per_task cannot be negative", tier));
                }
                WorkerConfig::Ollama { endpoint, model, .. } | WorkerConfig::OpenAI { endpoint, model, .. }
                    if endpoint.is_empty() || model.is_empty() =>
                {
                    return invalid(format!("workers.{} needs both endpoint and model", tier));
                }
                _ => {}
            }
        }

        if let VerificationConfig::Command { program, .. } = &spec.verification {
            if program.trim().is_empty() {
                return invalid("verification.program cannot be empty".into());
            }
        }

        Ok(())
    }
}

/// Resolve `env:VAR_NAME` indirection; other values are returned unchanged
pub fn resolve_secret(value: &str) -> Result<String, ConfigError> {
    match value.strip_prefix("env:") {
        Some(var) => std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.to_string())),
        None => Ok(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let config = VigilConfig::default();
        assert_eq!(config.api_version, "vigil/v1");
        assert_eq!(config.kind, "VigilConfig");
        assert_eq!(config.spec.retry.multipliers, vec![2.0, 3.0, 5.0, 10.0]);
        assert_eq!(config.spec.retry.max_retries, 4);
        assert_eq!(config.spec.dag.max_tasks, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_manifest_with_humantime_durations() {
        let yaml = r#"
apiVersion: vigil/v1
kind: VigilConfig
metadata:
  name: edge-1
spec:
  storage:
    backend: memory
  bus:
    visibility_timeout: 5s
  retry:
    base_timeout: 100ms
    max_retries: 2
  router:
    budget_ceiling: 3.5
  workers:
    local:
      type: ollama
      endpoint: http://localhost:11434
      model: llama3.2
    cloud:
      type: openai
      endpoint: https://api.openai.com/v1
      api_key: env:OPENAI_API_KEY
      model: gpt-4o
      cost_per_1k_tokens: 0.005
  verification:
    type: command
    program: cargo
    args: ["test"]
"#;
        let config = VigilConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.metadata.name, "edge-1");
        assert_eq!(config.spec.storage.backend, StorageBackend::Memory);
        assert_eq!(config.spec.bus.visibility_timeout, Duration::from_secs(5));
        assert_eq!(config.spec.retry.base_timeout, Duration::from_millis(100));
        assert_eq!(config.spec.router.budget_ceiling, 3.5);
        assert!(matches!(config.spec.workers.cloud, WorkerConfig::OpenAI { .. }));
        assert!(matches!(config.spec.verification, VerificationConfig::Command { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = VigilConfig::default();

        config.api_version = "wrong/v1".to_string();
        assert!(config.validate().is_err());
        config.api_version = API_VERSION.to_string();

        config.kind = "NodeConfig".to_string();
        assert!(config.validate().is_err());
        config.kind = KIND.to_string();

        config.spec.retry.max_retries = 9;
        assert!(config.validate().is_err());
        config.spec.retry.max_retries = 4;

        config.spec.engine.worker_pool_size = 0;
        assert!(config.validate().is_err());
        config.spec.engine.worker_pool_size = 2;

        config.spec.router.budget_ceiling = -1.0;
        assert!(config.validate().is_err());
        config.spec.router.budget_ceiling = 1.0;

        config.spec.verification = VerificationConfig::Command {
            program: " ".into(),
            args: vec![],
            working_dir: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_secret() {
        assert_eq!(resolve_secret("plain").unwrap(), "plain");
        assert!(matches!(
            resolve_secret("env:VIGIL_TEST_UNSET_SECRET_VAR"),
            Err(ConfigError::MissingEnv(_))
        ));
    }
}
