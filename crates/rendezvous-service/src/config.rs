//! Rendezvous service configuration.
//!
//! Configuration is loaded from environment variables. The relay password is
//! held as a `SecretString` and redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default Discovery API bind address.
pub const DEFAULT_DISCO_BIND_ADDRESS: &str = "0.0.0.0:1443";

/// Default signaling bind address.
pub const DEFAULT_SIGNAL_BIND_ADDRESS: &str = "0.0.0.0:2443";

/// Default relay address (advertised host and UDP port).
pub const DEFAULT_RELAY_ADDRESS: &str = "0.0.0.0:3478";

/// Default signaling realm.
pub const DEFAULT_REALM: &str = "main";

/// Default group time-to-live in seconds.
pub const DEFAULT_GROUP_TTL_SECONDS: u64 = 300;

/// Default sweep heartbeat in seconds.
pub const DEFAULT_TTL_HEARTBEAT_SECONDS: u64 = 60;

/// Relay long-term credential.
#[derive(Clone)]
pub struct RelayCredentials {
    /// The only user allowed to use the relay.
    pub username: String,

    /// Password corresponding to `username`.
    pub password: SecretString,
}

impl fmt::Debug for RelayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Rendezvous service configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Clone, Debug)]
pub struct Config {
    /// Discovery API bind address (default: "0.0.0.0:1443").
    pub disco_bind_address: String,

    /// Signaling bind address (default: "0.0.0.0:2443").
    pub signal_bind_address: String,

    /// Relay address as `host:port`. The host is the address advertised to
    /// peers, the port is bound on all interfaces (default: "0.0.0.0:3478").
    pub relay_address: String,

    /// Relay credential.
    pub relay_credentials: RelayCredentials,

    /// Administrative routing domain shared by signaling and relay.
    pub realm: String,

    /// PEM certificate chain. When set, the Discovery API and the signaling
    /// host both serve HTTPS.
    pub tls_cert_file: Option<String>,

    /// PEM private key matching `tls_cert_file`.
    pub tls_key_file: Option<String>,

    /// Group time-to-live.
    pub group_ttl: Duration,

    /// Interval at which the TTL sweeper runs.
    pub ttl_heartbeat: Duration,

    /// Seconds to wait after a shutdown signal before stopping (default: 0).
    pub drain_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid TTL configuration: {0}")]
    InvalidTtl(String),

    #[error("Invalid realm configuration: {0}")]
    InvalidRealm(String),

    #[error("Invalid TLS configuration: {0}")]
    InvalidTls(String),

    #[error("Invalid drain configuration: {0}")]
    InvalidDrain(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let disco_bind_address = vars
            .get("DISCO_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_DISCO_BIND_ADDRESS.to_string());

        let signal_bind_address = vars
            .get("SIGNAL_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNAL_BIND_ADDRESS.to_string());

        let relay_address = vars
            .get("RELAY_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_RELAY_ADDRESS.to_string());

        let username = vars
            .get("RELAY_USERNAME")
            .ok_or_else(|| ConfigError::MissingEnvVar("RELAY_USERNAME".to_string()))?
            .clone();

        let password = vars
            .get("RELAY_PASSWORD")
            .ok_or_else(|| ConfigError::MissingEnvVar("RELAY_PASSWORD".to_string()))?
            .clone();

        let realm = vars
            .get("SIGNAL_REALM")
            .cloned()
            .unwrap_or_else(|| DEFAULT_REALM.to_string());

        if realm.trim().is_empty() {
            return Err(ConfigError::InvalidRealm(
                "SIGNAL_REALM must not be empty".to_string(),
            ));
        }

        let tls_cert_file = vars.get("TLS_CERT_FILE").cloned();
        let tls_key_file = vars.get("TLS_KEY_FILE").cloned();

        if tls_cert_file.is_some() != tls_key_file.is_some() {
            return Err(ConfigError::InvalidTls(
                "TLS_CERT_FILE and TLS_KEY_FILE must be set together".to_string(),
            ));
        }

        let group_ttl = parse_positive_seconds(vars, "GROUP_TTL_SECONDS", DEFAULT_GROUP_TTL_SECONDS)?;
        let ttl_heartbeat =
            parse_positive_seconds(vars, "TTL_HEARTBEAT_SECONDS", DEFAULT_TTL_HEARTBEAT_SECONDS)?;

        let drain_seconds = if let Some(value_str) = vars.get("DRAIN_SECONDS") {
            value_str.parse().map_err(|e| {
                ConfigError::InvalidDrain(format!(
                    "DRAIN_SECONDS must be a valid non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?
        } else {
            0
        };

        Ok(Config {
            disco_bind_address,
            signal_bind_address,
            relay_address,
            relay_credentials: RelayCredentials {
                username,
                password: SecretString::from(password),
            },
            realm,
            tls_cert_file,
            tls_key_file,
            group_ttl,
            ttl_heartbeat,
            drain_seconds,
        })
    }
}

fn parse_positive_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(Duration::from_secs(default));
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidTtl(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidTtl(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(Duration::from_secs(value))
}
