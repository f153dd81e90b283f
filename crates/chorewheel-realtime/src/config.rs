//! # Realtime Configuration
//!
//! Configuration management for the realtime channel.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CHOREWHEEL_TRANSPORT=push_stream                                   │
//! │     CHOREWHEEL_REALTIME_ENABLED=false                                  │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/chorewheel/realtime.toml (Linux)                         │
//! │     ~/Library/Application Support/app.chorewheel.chorewheel/... (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     duplex transport, 1s..30s backoff, 10-failure breaker              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # realtime.toml
//! [realtime]
//! enabled = true
//! transport = "duplex"   # duplex | push_stream
//!
//! [backoff]
//! delays_ms = [1000, 2000, 5000, 10000, 30000]
//! max_attempts = 10
//!
//! [circuit]
//! failure_threshold = 10
//! cooldown_ms = 300000
//!
//! [heartbeat]
//! stale_after_ms = 90000
//! check_interval_ms = 30000
//!
//! [duplex]
//! auth_failure_code = 4001
//! forbidden_code = 4003
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{RealtimeError, RealtimeResult};

// =============================================================================
// Transport Kind
// =============================================================================

/// Which transport variant the channel opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Unidirectional server-sent event stream; credential in a header.
    PushStream,

    /// Bidirectional socket; credential and tenant in the URL.
    #[default]
    Duplex,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::PushStream => write!(f, "push_stream"),
            TransportKind::Duplex => write!(f, "duplex"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "push_stream" | "push-stream" | "sse" | "stream" => Ok(TransportKind::PushStream),
            "duplex" | "socket" | "websocket" | "ws" => Ok(TransportKind::Duplex),
            other => Err(RealtimeError::InvalidConfig(format!(
                "Unknown transport: '{}'. Valid options: push_stream, duplex",
                other
            ))),
        }
    }
}

// =============================================================================
// Channel Settings
// =============================================================================

/// General channel behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSettings {
    /// Whether the realtime channel is enabled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Transport variant.
    #[serde(default)]
    pub transport: TransportKind,

    /// Path of the push-stream endpoint, appended to the API base URL.
    #[serde(default = "default_push_path")]
    pub push_path: String,

    /// Path of the duplex socket endpoint, appended to the API base URL.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Handshake timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_push_path() -> String {
    "/api/realtime/events".to_string()
}

fn default_socket_path() -> String {
    "/api/realtime/ws".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        RealtimeSettings {
            enabled: true,
            transport: TransportKind::default(),
            push_path: default_push_path(),
            socket_path: default_socket_path(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl RealtimeSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Backoff Settings
// =============================================================================

/// Reconnect delay table.
///
/// Attempt `a` (0-based) waits `delays_ms[min(a, len - 1)]`. There is no
/// jitter; delays are deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSettings {
    #[serde(default = "default_delays")]
    pub delays_ms: Vec<u64>,

    /// Attempt ceiling; `connect()` is refused once reached.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_delays() -> Vec<u64> {
    vec![1_000, 2_000, 5_000, 10_000, 30_000]
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for BackoffSettings {
    fn default() -> Self {
        BackoffSettings {
            delays_ms: default_delays(),
            max_attempts: default_max_attempts(),
        }
    }
}

// =============================================================================
// Circuit Breaker Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSettings {
    /// Consecutive failures that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the breaker stays open (milliseconds).
    #[serde(default = "default_cooldown")]
    pub cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    10
}

fn default_cooldown() -> u64 {
    300_000
}

impl Default for CircuitSettings {
    fn default() -> Self {
        CircuitSettings {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown(),
        }
    }
}

impl CircuitSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

// =============================================================================
// Heartbeat Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    /// Silence longer than this forces a reconnect (milliseconds).
    #[serde(default = "default_stale_after")]
    pub stale_after_ms: u64,

    /// How often staleness is checked (milliseconds).
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,
}

fn default_stale_after() -> u64 {
    90_000
}

fn default_check_interval() -> u64 {
    30_000
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        HeartbeatSettings {
            stale_after_ms: default_stale_after(),
            check_interval_ms: default_check_interval(),
        }
    }
}

impl HeartbeatSettings {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

// =============================================================================
// Duplex Settings
// =============================================================================

/// Close codes the duplex server uses for unrecoverable credential problems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplexSettings {
    /// Authentication failed (bad or expired token).
    #[serde(default = "default_auth_failure_code")]
    pub auth_failure_code: u16,

    /// Authenticated but not allowed on this tenant.
    #[serde(default = "default_forbidden_code")]
    pub forbidden_code: u16,
}

fn default_auth_failure_code() -> u16 {
    4001
}

fn default_forbidden_code() -> u16 {
    4003
}

impl Default for DuplexSettings {
    fn default() -> Self {
        DuplexSettings {
            auth_failure_code: default_auth_failure_code(),
            forbidden_code: default_forbidden_code(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete realtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default)]
    pub realtime: RealtimeSettings,

    #[serde(default)]
    pub backoff: BackoffSettings,

    #[serde(default)]
    pub circuit: CircuitSettings,

    #[serde(default)]
    pub heartbeat: HeartbeatSettings,

    #[serde(default)]
    pub duplex: DuplexSettings,
}

impl RealtimeConfig {
    /// Creates a config with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (realtime.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> RealtimeResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading realtime config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load realtime config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> RealtimeResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| RealtimeError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RealtimeError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .map_err(|e| RealtimeError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Realtime config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RealtimeResult<()> {
        for (name, path) in [
            ("push_path", &self.realtime.push_path),
            ("socket_path", &self.realtime.socket_path),
        ] {
            if !path.starts_with('/') {
                return Err(RealtimeError::InvalidConfig(format!(
                    "{} must start with '/', got: {}",
                    name, path
                )));
            }
        }

        if self.realtime.connect_timeout_secs == 0 {
            return Err(RealtimeError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.backoff.delays_ms.is_empty() {
            return Err(RealtimeError::InvalidConfig(
                "backoff.delays_ms must contain at least one delay".into(),
            ));
        }

        if self.backoff.max_attempts == 0 {
            return Err(RealtimeError::InvalidConfig(
                "backoff.max_attempts must be greater than 0".into(),
            ));
        }

        if self.circuit.failure_threshold == 0 {
            return Err(RealtimeError::InvalidConfig(
                "circuit.failure_threshold must be greater than 0".into(),
            ));
        }

        if self.heartbeat.check_interval_ms == 0 {
            return Err(RealtimeError::InvalidConfig(
                "heartbeat.check_interval_ms must be greater than 0".into(),
            ));
        }

        // A staleness window shorter than one check would fire on the first tick.
        if self.heartbeat.stale_after_ms <= self.heartbeat.check_interval_ms {
            return Err(RealtimeError::InvalidConfig(
                "heartbeat.stale_after_ms must exceed check_interval_ms".into(),
            ));
        }

        if self.duplex.auth_failure_code == self.duplex.forbidden_code {
            return Err(RealtimeError::InvalidConfig(
                "duplex close codes must differ".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("CHOREWHEEL_REALTIME_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.realtime.enabled = true,
                "0" | "false" | "no" | "off" => self.realtime.enabled = false,
                _ => warn!(value = %enabled, "Ignoring unrecognised CHOREWHEEL_REALTIME_ENABLED"),
            }
        }

        if let Ok(transport) = std::env::var("CHOREWHEEL_TRANSPORT") {
            match transport.parse() {
                Ok(kind) => {
                    debug!(transport = %transport, "Overriding transport from environment");
                    self.realtime.transport = kind;
                }
                Err(e) => warn!(%e, "Ignoring CHOREWHEEL_TRANSPORT"),
            }
        }

        if let Ok(path) = std::env::var("CHOREWHEEL_PUSH_PATH") {
            self.realtime.push_path = path;
        }

        if let Ok(path) = std::env::var("CHOREWHEEL_SOCKET_PATH") {
            self.realtime.socket_path = path;
        }

        if let Ok(timeout) = std::env::var("CHOREWHEEL_CONNECT_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.realtime.connect_timeout_secs = secs;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("app", "chorewheel", "chorewheel")
            .map(|dirs| dirs.config_dir().join("realtime.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parsing() {
        assert_eq!(
            "push_stream".parse::<TransportKind>().unwrap(),
            TransportKind::PushStream
        );
        assert_eq!("sse".parse::<TransportKind>().unwrap(), TransportKind::PushStream);
        assert_eq!("duplex".parse::<TransportKind>().unwrap(), TransportKind::Duplex);
        assert_eq!("WebSocket".parse::<TransportKind>().unwrap(), TransportKind::Duplex);
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = RealtimeConfig::default();
        assert!(config.realtime.enabled);
        assert_eq!(config.backoff.delays_ms, vec![1000, 2000, 5000, 10000, 30000]);
        assert_eq!(config.backoff.max_attempts, 10);
        assert_eq!(config.circuit.failure_threshold, 10);
        assert_eq!(config.circuit.cooldown(), Duration::from_millis(300_000));
        assert_eq!(config.heartbeat.stale_after(), Duration::from_millis(90_000));
        assert_eq!(config.heartbeat.check_interval(), Duration::from_millis(30_000));
        assert_eq!(config.duplex.auth_failure_code, 4001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RealtimeConfig::default();
        config.backoff.delays_ms.clear();
        assert!(config.validate().is_err());

        let mut config = RealtimeConfig::default();
        config.heartbeat.stale_after_ms = config.heartbeat.check_interval_ms;
        assert!(config.validate().is_err());

        let mut config = RealtimeConfig::default();
        config.realtime.socket_path = "ws".into();
        assert!(config.validate().is_err());

        let mut config = RealtimeConfig::default();
        config.duplex.forbidden_code = config.duplex.auth_failure_code;
        assert!(config.validate().is_err());

        let mut config = RealtimeConfig::default();
        config.circuit.failure_threshold = 0;
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RealtimeConfig = toml::from_str(
            r#"
            [realtime]
            transport = "push_stream"

            [circuit]
            cooldown_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.realtime.transport, TransportKind::PushStream);
        assert_eq!(config.realtime.push_path, "/api/realtime/events");
        assert_eq!(config.circuit.cooldown_ms, 1000);
        assert_eq!(config.circuit.failure_threshold, 10);
    }

    #[test]
    fn test_toml_serialization() {
        let config = RealtimeConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[realtime]"));
        assert!(toml_str.contains("[heartbeat]"));
    }

    #[test]
    fn test_save_and_load_round_trip_through_file() {
        let dir = std::env::temp_dir().join(format!("chorewheel-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("realtime.toml");

        let mut config = RealtimeConfig::default();
        config.circuit.cooldown_ms = 42_000;
        config.save(Some(path.clone())).unwrap();

        let loaded: RealtimeConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.circuit.cooldown_ms, 42_000);

        let _ = std::fs::remove_dir_all(dir);
    }
}
