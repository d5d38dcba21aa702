//! Configuration module for bucketsyncd.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, defaults and validation.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::{Destination, SourcePattern};
use crate::retry::Backoff;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for bucketsyncd.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub outbound: Vec<OutboundWorkflow>,
    #[serde(default)]
    pub inbound: Vec<InboundWorkflow>,
    #[serde(default)]
    pub remotes: Vec<Remote>,
}

/// Retry ceiling shared by broker dialing and storage client construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Local directory → remote bucket/collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundWorkflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Parsed and reported only; content is never transformed.
    #[serde(default)]
    pub sensitive: bool,
    /// Watch directory plus filename glob, e.g. `/tmp/watch/*.csv`.
    pub source: String,
    /// `s3://`, `http(s)://`, `webdav://` or `webdavs://` URI.
    pub destination: String,
    /// Parsed and reported only; no external processor is run.
    #[serde(default, alias = "processWith", skip_serializing_if = "Option::is_none")]
    pub process_with: Option<String>,
    /// Quiet period before a written file is uploaded; 0 uploads on every write.
    #[serde(default)]
    pub debounce_ms: u64,
}

/// Broker notifications → local directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundWorkflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// AMQP URI of the broker.
    pub source: String,
    pub exchange: String,
    pub queue: String,
    /// Name of the remote that holds the notified objects.
    pub remote: String,
    /// Existing local directory downloads are written into.
    pub destination: PathBuf,
    #[serde(default)]
    pub ack_policy: AckPolicy,
}

/// When a processed delivery is acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Ack once every record was attempted, even when some failed.
    #[default]
    Always,
    /// Ack only when every record succeeded; otherwise reject with requeue.
    OnSuccess,
}

/// A named credential set for an S3-compatible endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    /// Host name (matched against outbound destination hosts) or a full URL.
    pub endpoint: String,
    #[serde(rename = "accessKey", alias = "access_key")]
    pub access_key: String,
    #[serde(rename = "secretKey", alias = "secret_key")]
    pub secret_key: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Use TLS when `endpoint` is a bare host name.
    #[serde(default = "default_secure")]
    pub secure: bool,
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field("region", &self.region)
            .field("secure", &self.secure)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_secure() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            retry: RetryConfig::default(),
            outbound: Vec::new(),
            inbound: Vec::new(),
            remotes: Vec::new(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.max_attempts)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"outbound[0].source"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `log_level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid schemes for inbound `source`.
const VALID_BROKER_SCHEMES: &[&str] = &["amqp", "amqps"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. Whether an inbound
    /// `remote` names a configured remote is not checked here: a missing
    /// remote only skips the records that need it.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: String, message: String| {
            errors.push(ValidationError { field, message });
        };

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            push(
                "log_level".into(),
                format!(
                    "invalid level '{}'; valid options: {}",
                    self.log_level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            );
        }

        if self.retry.max_attempts == 0 {
            push("retry.max_attempts".into(), "must be greater than 0".into());
        }

        let mut workflow_names = HashSet::new();

        // --- outbound ---
        for (i, workflow) in self.outbound.iter().enumerate() {
            let at = |field: &str| format!("outbound[{i}].{field}");

            check_name(&workflow.name, at("name"), &mut workflow_names, &mut push);
            if let Err(e) = SourcePattern::parse(&workflow.source) {
                push(at("source"), e.to_string());
            }
            if let Err(e) = Destination::parse(&workflow.destination) {
                push(at("destination"), e.to_string());
            }
        }

        // --- inbound ---
        for (i, workflow) in self.inbound.iter().enumerate() {
            let at = |field: &str| format!("inbound[{i}].{field}");

            check_name(&workflow.name, at("name"), &mut workflow_names, &mut push);
            match Url::parse(&workflow.source) {
                Ok(url) if VALID_BROKER_SCHEMES.contains(&url.scheme()) => {}
                Ok(url) => push(
                    at("source"),
                    format!("unsupported broker scheme '{}'", url.scheme()),
                ),
                Err(e) => push(at("source"), format!("invalid broker URI: {e}")),
            }
            if workflow.exchange.is_empty() {
                push(at("exchange"), "must not be empty".into());
            }
            if workflow.queue.is_empty() {
                push(at("queue"), "must not be empty".into());
            }
            if workflow.remote.is_empty() {
                push(at("remote"), "must not be empty".into());
            }
            if workflow.destination.as_os_str().is_empty() {
                push(at("destination"), "must not be empty".into());
            }
        }

        // --- remotes ---
        let mut remote_names = HashSet::new();
        for (i, remote) in self.remotes.iter().enumerate() {
            let at = |field: &str| format!("remotes[{i}].{field}");

            check_name(&remote.name, at("name"), &mut remote_names, &mut push);
            if remote.endpoint.is_empty() {
                push(at("endpoint"), "must not be empty".into());
            }
        }

        errors
    }
}

fn check_name<'a>(
    name: &'a str,
    field: String,
    seen: &mut HashSet<&'a str>,
    push: &mut impl FnMut(String, String),
) {
    if name.is_empty() {
        push(field, "must not be empty".into());
    } else if !seen.insert(name) {
        push(field, format!("duplicate name '{name}'"));
    }
}
