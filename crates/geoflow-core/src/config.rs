//! # Configuration
//!
//! `GeoflowConfig` is resolved in three steps: an optional TOML file, then
//! `GEOFLOW_*` environment overrides, then `validate()`. Every section has
//! defaults, so an empty file (or no file) yields a working development
//! configuration with the geocoder and export pipelines.
//!
//! ```toml
//! environment = "production"
//! phases = ["DOWNLOAD", "CONVERT", "INDEX", "DEPLOY", "EXPORT"]
//!
//! [aggregator]
//! max_messages = 100
//! window_ms = 1000
//!
//! [pipelines.geocoder]
//! topic = "geocoder"
//! domain = "GEOCODER"
//! action = "geocoder.run"
//! retry = { max_retries = 600, delay_ms = 15000 }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::{AggregatorSettings, PipelineSettings};
use crate::domain::{CarryOver, DEFAULT_CARRY_PREFIX, PhaseOrder, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },

    #[error("unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoflowConfig {
    /// `development`, `test` or `production`. Drives the default log level.
    pub environment: String,
    pub logging: LoggingConfig,
    pub aggregator: AggregatorConfig,

    /// Phase priority table, lowest first.
    pub phases: Vec<String>,

    /// Header prefixes carried from one iteration to the next.
    pub carry_over_prefixes: Vec<String>,
    pub leader: LeaderConfig,
    pub pipelines: BTreeMap<String, PipelineConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: Option<String>,
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub max_messages: usize,
    pub window_ms: u64,
    pub idle_poll_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_messages: 100,
            window_ms: 1000,
            idle_poll_ms: 1000,
        }
    }
}

impl AggregatorConfig {
    pub fn settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            max_messages: self.max_messages,
            window: Duration::from_millis(self.window_ms),
            idle_poll: Duration::from_millis(self.idle_poll_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderConfig {
    pub lease_ttl_ms: u64,

    /// Wait between acquisition attempts while another replica leads.
    pub retry_ms: u64,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: 30_000,
            retry_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub topic: String,

    /// `domain` of emitted JobEvents.
    pub domain: String,

    /// `action` of the run-level events (PENDING, OK).
    pub action: String,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(RetryPolicy::default())
    }
}

impl From<RetryPolicy> for RetryConfig {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            delay_ms: policy.delay.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.delay_ms))
    }
}

impl Default for GeoflowConfig {
    fn default() -> Self {
        let mut pipelines = BTreeMap::new();
        pipelines.insert(
            "geocoder".to_string(),
            PipelineConfig {
                topic: "geocoder".to_string(),
                domain: "GEOCODER".to_string(),
                action: "geocoder.run".to_string(),
                retry: RetryPolicy::geocoder_default().into(),
            },
        );
        pipelines.insert(
            "export".to_string(),
            PipelineConfig {
                topic: "geocoder-export".to_string(),
                domain: "EXPORT".to_string(),
                action: "export.poll".to_string(),
                retry: RetryPolicy::export_default().into(),
            },
        );

        Self {
            environment: "development".to_string(),
            logging: LoggingConfig::default(),
            aggregator: AggregatorConfig::default(),
            phases: PhaseOrder::default_geocoder()
                .phases()
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            carry_over_prefixes: vec![DEFAULT_CARRY_PREFIX.to_string()],
            leader: LeaderConfig::default(),
            pipelines,
        }
    }
}

impl GeoflowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// File (optional) + process environment + validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file, without env overrides or validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn with_environment<S: Into<String>>(mut self, environment: S) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_pipeline<S: Into<String>>(mut self, name: S, pipeline: PipelineConfig) -> Self {
        self.pipelines.insert(name.into(), pipeline);
        self
    }

    /// Apply `GEOFLOW_*` overrides from `vars`. Unrelated keys are ignored.
    pub fn apply_env_overrides<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with("GEOFLOW_"))
            .collect();

        if let Some(v) = vars.get("GEOFLOW_ENV") {
            self.environment = v.clone();
        }
        if let Some(v) = vars.get("GEOFLOW_LOG") {
            self.logging.filter = Some(v.clone());
        }
        if let Some(v) = vars.get("GEOFLOW_LOG_JSON") {
            self.logging.json = parse_env("GEOFLOW_LOG_JSON", v)?;
        }
        if let Some(v) = vars.get("GEOFLOW_AGGREGATOR_MAX_MESSAGES") {
            self.aggregator.max_messages = parse_env("GEOFLOW_AGGREGATOR_MAX_MESSAGES", v)?;
        }
        if let Some(v) = vars.get("GEOFLOW_AGGREGATOR_WINDOW_MS") {
            self.aggregator.window_ms = parse_env("GEOFLOW_AGGREGATOR_WINDOW_MS", v)?;
        }

        for (name, pipeline) in self.pipelines.iter_mut() {
            let prefix = format!("GEOFLOW_{}", name.to_uppercase().replace('-', "_"));

            let key = format!("{prefix}_MAX_RETRIES");
            if let Some(v) = vars.get(&key) {
                pipeline.retry.max_retries = parse_env(&key, v)?;
            }
            let key = format!("{prefix}_DELAY_MS");
            if let Some(v) = vars.get(&key) {
                pipeline.retry.delay_ms = parse_env(&key, v)?;
            }
            if let Some(v) = vars.get(&format!("{prefix}_TOPIC")) {
                pipeline.topic = v.clone();
            }
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregator.max_messages == 0 {
            return Err(ConfigError::Invalid("aggregator.max_messages must be > 0".into()));
        }
        if self.aggregator.window_ms == 0 {
            return Err(ConfigError::Invalid("aggregator.window_ms must be > 0".into()));
        }
        if self.phases.is_empty() {
            return Err(ConfigError::Invalid("phases must not be empty".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.phases.iter().find(|p| !seen.insert(p.as_str())) {
            return Err(ConfigError::Invalid(format!("duplicate phase {dup}")));
        }

        if self.leader.lease_ttl_ms == 0 {
            return Err(ConfigError::Invalid("leader.lease_ttl_ms must be > 0".into()));
        }

        let mut topics = HashSet::new();
        for (name, pipeline) in &self.pipelines {
            if pipeline.retry.delay_ms >= self.leader.lease_ttl_ms {
                return Err(ConfigError::Invalid(format!(
                    "pipeline {name}: retry delay_ms must be shorter than leader.lease_ttl_ms"
                )));
            }
            if pipeline.topic.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("pipeline {name} has an empty topic")));
            }
            if !topics.insert(pipeline.topic.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "topic {} is used by more than one pipeline",
                    pipeline.topic
                )));
            }
        }
        Ok(())
    }

    /// Priority table built from `phases`.
    pub fn phase_order(&self) -> PhaseOrder {
        PhaseOrder::new(self.phases.iter().map(String::as_str))
    }

    pub fn carry_over(&self) -> CarryOver {
        CarryOver::new(self.carry_over_prefixes.iter().map(String::as_str))
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.leader.lease_ttl_ms)
    }

    pub fn lease_retry(&self) -> Duration {
        Duration::from_millis(self.leader.retry_ms)
    }

    /// Engine settings of pipeline `name`.
    pub fn pipeline(&self, name: &str) -> Result<PipelineSettings, ConfigError> {
        let pipeline = self
            .pipelines
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPipeline(name.to_string()))?;
        Ok(PipelineSettings {
            name: name.to_string(),
            topic: pipeline.topic.clone(),
            domain: pipeline.domain.clone(),
            action: pipeline.action.clone(),
            retry: pipeline.retry.policy(),
        })
    }

    pub fn pipeline_names(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}
