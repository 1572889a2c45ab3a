//! Meeting mesh configuration.
//!
//! Loaded from environment variables. Values that change protocol behaviour
//! (discovery cadence, claim bound, session fan-out) are validated and a bad
//! value is an error rather than a silent default. The roster API token is
//! redacted in Debug output.

use crate::identity::DEFAULT_MAX_CLAIM_ATTEMPTS;
use crate::events::DEFAULT_EVENT_CHANNEL_CAPACITY;
use crate::roster::http::DEFAULT_ROSTER_HTTP_TIMEOUT;
use crate::tasks::discovery::{
    DiscoveryOptions, DEFAULT_DISCOVERY_INTERVAL, DEFAULT_MAX_DISCOVERY_MEMBERS,
    DEFAULT_SESSION_VARIANTS,
};

use common::config::{ObservabilityConfig, DEFAULT_LOG_LEVEL};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Meeting mesh configuration.
#[derive(Clone)]
pub struct MeshConfig {
    /// Discovery tick cadence (default: 5000 ms).
    pub discovery_interval: Duration,

    /// Bound on identity claim attempts (default: 5).
    pub max_claim_attempts: u32,

    /// Addresses probed per roster member per tick (default: 3).
    pub session_variants: u32,

    /// Cap on roster members probed per tick; 0 disables it (default: 64).
    pub max_discovery_members: usize,

    /// Mesh event broadcast capacity (default: 256).
    pub event_channel_capacity: usize,

    /// Base URL of the roster REST API, if any.
    pub roster_api_url: Option<String>,

    /// Bearer token for the roster API.
    pub roster_api_token: Option<SecretString>,

    /// Roster HTTP timeout (default: 10000 ms).
    pub roster_http_timeout: Duration,

    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for MeshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshConfig")
            .field("discovery_interval", &self.discovery_interval)
            .field("max_claim_attempts", &self.max_claim_attempts)
            .field("session_variants", &self.session_variants)
            .field("max_discovery_members", &self.max_discovery_members)
            .field("event_channel_capacity", &self.event_channel_capacity)
            .field("roster_api_url", &self.roster_api_url)
            .field(
                "roster_api_token",
                &self.roster_api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("roster_http_timeout", &self.roster_http_timeout)
            .field("observability", &self.observability)
            .finish()
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
            max_claim_attempts: DEFAULT_MAX_CLAIM_ATTEMPTS,
            session_variants: DEFAULT_SESSION_VARIANTS,
            max_discovery_members: DEFAULT_MAX_DISCOVERY_MEMBERS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            roster_api_url: None,
            roster_api_token: None,
            roster_http_timeout: DEFAULT_ROSTER_HTTP_TIMEOUT,
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse `name` if present, otherwise `default`.
fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{name} must be a number, got {raw:?}"))
        }),
    }
}

fn parse_bool(vars: &HashMap<String, String>, name: &str) -> Result<bool, ConfigError> {
    match vars.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(format!(
            "{name} must be a boolean, got {v:?}"
        ))),
    }
}

fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl MeshConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for malformed or out-of-range
    /// values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for malformed or out-of-range
    /// values.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let discovery_interval_ms: u64 = parse_var(
            vars,
            "MESH_DISCOVERY_INTERVAL_MS",
            u64::try_from(DEFAULT_DISCOVERY_INTERVAL.as_millis()).unwrap_or(5000),
        )?;
        if discovery_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "MESH_DISCOVERY_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }

        let max_claim_attempts: u32 =
            parse_var(vars, "MESH_MAX_CLAIM_ATTEMPTS", DEFAULT_MAX_CLAIM_ATTEMPTS)?;
        if max_claim_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MESH_MAX_CLAIM_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let session_variants: u32 =
            parse_var(vars, "MESH_SESSION_VARIANTS", DEFAULT_SESSION_VARIANTS)?;
        if session_variants == 0 {
            return Err(ConfigError::InvalidValue(
                "MESH_SESSION_VARIANTS must be at least 1".to_string(),
            ));
        }

        let max_discovery_members = parse_var(
            vars,
            "MESH_MAX_DISCOVERY_MEMBERS",
            DEFAULT_MAX_DISCOVERY_MEMBERS,
        )?;

        let event_channel_capacity = parse_var(
            vars,
            "MESH_EVENT_CHANNEL_CAPACITY",
            DEFAULT_EVENT_CHANNEL_CAPACITY,
        )?
        .max(1);

        let roster_http_timeout_ms: u64 = parse_var(
            vars,
            "MESH_ROSTER_HTTP_TIMEOUT_MS",
            u64::try_from(DEFAULT_ROSTER_HTTP_TIMEOUT.as_millis()).unwrap_or(10_000),
        )?;

        let roster_api_url = non_empty(vars, "MESH_ROSTER_API_URL");
        let roster_api_token = non_empty(vars, "MESH_ROSTER_API_TOKEN").map(SecretString::from);

        let observability = ObservabilityConfig {
            log_level: non_empty(vars, "MESH_LOG_LEVEL")
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            json_logs: parse_bool(vars, "MESH_JSON_LOGS")?,
        };

        Ok(Self {
            discovery_interval: Duration::from_millis(discovery_interval_ms),
            max_claim_attempts,
            session_variants,
            max_discovery_members,
            event_channel_capacity,
            roster_api_url,
            roster_api_token,
            roster_http_timeout: Duration::from_millis(roster_http_timeout_ms),
            observability,
        })
    }

    /// Discovery tuning derived from this config.
    #[must_use]
    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            interval: self.discovery_interval,
            session_variants: self.session_variants,
            max_members: self.max_discovery_members,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = MeshConfig::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config.discovery_interval, Duration::from_millis(5000));
        assert_eq!(config.max_claim_attempts, 5);
        assert_eq!(config.session_variants, 3);
        assert_eq!(config.max_discovery_members, 64);
        assert_eq!(config.event_channel_capacity, 256);
        assert!(config.roster_api_url.is_none());
        assert!(config.roster_api_token.is_none());
        assert_eq!(config.roster_http_timeout, Duration::from_secs(10));
        assert_eq!(config.observability, ObservabilityConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = MeshConfig::from_vars(&vars(&[
            ("MESH_DISCOVERY_INTERVAL_MS", "250"),
            ("MESH_MAX_CLAIM_ATTEMPTS", "2"),
            ("MESH_SESSION_VARIANTS", "1"),
            ("MESH_MAX_DISCOVERY_MEMBERS", "0"),
            ("MESH_ROSTER_API_URL", "http://roster.local"),
            ("MESH_ROSTER_API_TOKEN", "tok"),
            ("MESH_LOG_LEVEL", "debug"),
            ("MESH_JSON_LOGS", "true"),
        ]))
        .unwrap();

        assert_eq!(config.discovery_interval, Duration::from_millis(250));
        assert_eq!(config.max_claim_attempts, 2);
        assert_eq!(config.session_variants, 1);
        assert_eq!(config.discovery_options().max_members, 0);
        assert_eq!(config.roster_api_url.as_deref(), Some("http://roster.local"));
        assert_eq!(
            config.roster_api_token.as_ref().unwrap().expose_secret(),
            "tok"
        );
        assert_eq!(config.observability.log_level, "debug");
        assert!(config.observability.json_logs);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let err = MeshConfig::from_vars(&vars(&[("MESH_DISCOVERY_INTERVAL_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_rejects_malformed_numbers() {
        for name in [
            "MESH_DISCOVERY_INTERVAL_MS",
            "MESH_MAX_CLAIM_ATTEMPTS",
            "MESH_SESSION_VARIANTS",
        ] {
            let err = MeshConfig::from_vars(&vars(&[(name, "five")])).unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidValue(msg) if msg.contains(name)),
                "unexpected error for {name}: {err:?}"
            );
        }
    }

    #[test]
    fn test_rejects_zero_claim_attempts_and_variants() {
        assert!(MeshConfig::from_vars(&vars(&[("MESH_MAX_CLAIM_ATTEMPTS", "0")])).is_err());
        assert!(MeshConfig::from_vars(&vars(&[("MESH_SESSION_VARIANTS", "0")])).is_err());
    }

    #[test]
    fn test_rejects_bad_bool() {
        assert!(MeshConfig::from_vars(&vars(&[("MESH_JSON_LOGS", "maybe")])).is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config =
            MeshConfig::from_vars(&vars(&[("MESH_ROSTER_API_TOKEN", "super-secret")])).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
