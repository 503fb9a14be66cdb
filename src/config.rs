//! Listener configuration parameters
//!
//! All tunable parameters for the pass counter.
//! Values come from defaults, an optional JSON file, then environment
//! variables, in that order.  The merged result is validated once;
//! invalid values are rejected, never clamped.

use core::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detector::admission::DEFAULT_SENSOR_ID;
use crate::detector::debounce::DEFAULT_DEBOUNCE_MS;
use crate::detector::normalize::TokenSet;

/// Core listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    // --- Broker ---
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval negotiated with the broker (seconds)
    pub keep_alive_secs: u16,

    // --- Topics ---
    /// The single sensor state topic (no wildcards)
    pub state_topic: String,
    /// Liveness topic for the retained "online"/"offline" heartbeat and last will
    pub heartbeat_topic: Option<String>,

    // --- Detection ---
    /// Identifier used when a payload carries no `id`
    pub default_sensor_id: String,
    /// Minimum dwell between scored transitions (milliseconds, 0 = off)
    pub debounce_ms: u32,
    pub tokens: TokenSet,

    // --- Supervisor timing ---
    /// Deadline for the initial connection (milliseconds)
    pub connect_timeout_ms: u64,
    /// Reconnect backoff floor (milliseconds)
    pub backoff_floor_ms: u64,
    /// Reconnect backoff ceiling (milliseconds)
    pub backoff_ceiling_ms: u64,
    /// Maximum time one broker poll blocks (milliseconds)
    pub poll_interval_ms: u64,

    // --- Persistence ---
    /// Hand counts to a bounded worker queue instead of writing inline
    pub queued_persistence: bool,
    /// Append-only count journal; `None` keeps counts in memory only
    pub journal_path: Option<PathBuf>,

    pub log_level: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            // Broker
            broker_host: "localhost".into(),
            broker_port: 1883,
            client_id: "beamcount_listener".into(),
            username: None,
            password: None,
            keep_alive_secs: 60,

            // Topics
            state_topic: "sensores/barreira/estado".into(),
            heartbeat_topic: Some("sensores/barreira/listener/status".into()),

            // Detection
            default_sensor_id: DEFAULT_SENSOR_ID.into(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            tokens: TokenSet::default(),

            // Supervisor timing
            connect_timeout_ms: 10_000,
            backoff_floor_ms: 1_000,    // 1 s
            backoff_ceiling_ms: 30_000, // 30 s
            poll_interval_ms: 250,

            // Persistence
            queued_persistence: false,
            journal_path: None,

            log_level: "info".into(),
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Config file could not be read.
    Io(String),
    /// Config file is not valid JSON for [`ListenerConfig`].
    Parse(String),
    /// An environment variable holds an unparsable value.
    InvalidValue { key: &'static str, value: String },
    /// A field failed range validation.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "cannot read config: {}", msg),
            Self::Parse(msg) => write!(f, "cannot parse config: {}", msg),
            Self::InvalidValue { key, value } => write!(f, "invalid value for {}: {:?}", key, value),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ListenerConfig {
    /// Defaults → optional JSON file → process environment → validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Override fields from environment-style variables.
    ///
    /// Empty values count as unset.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MQTT_BROKER_HOST") {
            self.broker_host = v;
        }
        if let Some(v) = get("MQTT_BROKER_PORT") {
            self.broker_port = parse("MQTT_BROKER_PORT", &v)?;
        }
        if let Some(v) = get("MQTT_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = get("MQTT_USERNAME") {
            self.username = Some(v);
        }
        if let Some(v) = get("MQTT_PASSWORD") {
            self.password = Some(v);
        }
        if let Some(v) = get("MQTT_TOPIC_STATE") {
            self.state_topic = v;
        }
        if let Some(v) = get("MQTT_TOPIC_HEARTBEAT") {
            self.heartbeat_topic = Some(v);
        }
        if let Some(v) = get("SENSOR_DEFAULT_ID") {
            self.default_sensor_id = v;
        }
        if let Some(v) = get("DEBOUNCE_MS") {
            self.debounce_ms = parse("DEBOUNCE_MS", &v)?;
        }
        if let Some(v) = get("COUNT_JOURNAL_PATH") {
            self.journal_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }
        Ok(())
    }

    /// Range and consistency checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_host.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("broker_host must not be empty"));
        }
        if self.broker_port == 0 {
            return Err(ConfigError::ValidationFailed("broker_port must be non-zero"));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("client_id must not be empty"));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::ValidationFailed("password set without username"));
        }
        if !is_concrete_topic(&self.state_topic) {
            return Err(ConfigError::ValidationFailed(
                "state_topic must be a single concrete topic (no wildcards)",
            ));
        }
        if let Some(hb) = &self.heartbeat_topic {
            if !is_concrete_topic(hb) {
                return Err(ConfigError::ValidationFailed("heartbeat_topic must be a concrete topic"));
            }
            if *hb == self.state_topic {
                return Err(ConfigError::ValidationFailed("heartbeat_topic must differ from state_topic"));
            }
        }
        if self.default_sensor_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("default_sensor_id must not be empty"));
        }
        if !self.tokens.is_valid() {
            return Err(ConfigError::ValidationFailed("token lists must be non-empty and non-blank"));
        }
        if self.backoff_floor_ms == 0 || self.backoff_floor_ms > self.backoff_ceiling_ms {
            return Err(ConfigError::ValidationFailed("backoff floor must be in 1..=ceiling"));
        }
        if self.connect_timeout_ms == 0 || self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("timeouts must be non-zero"));
        }
        if self.keep_alive_secs < 5 {
            return Err(ConfigError::ValidationFailed("keep_alive_secs must be at least 5"));
        }
        Ok(())
    }

    /// `host:port` form used in logs and status.
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }
}

fn parse<T: core::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
    })
}

fn is_concrete_topic(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#']) && !topic.contains('\0')
}
