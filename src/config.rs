// src/config.rs

//! Client configuration: loading, defaults, and fail-fast validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// TLS client credentials. Presence of this struct on a `Config` implies the client
/// dials hosts over `https://` using `tokio-rustls`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub root_certificate: PathBuf,
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    #[serde(default)]
    pub cert_chain: Option<PathBuf>,
}

/// Username/password credentials exchanged for a bearer token on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

/// Per-host circuit-breaker policy plus the pool's global retry budget and the watch
/// multiplexer's reconnect backoff cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultHandlingConfig {
    /// Attempts the global policy makes across the whole pool for one logical call.
    pub global_max_retries: usize,
    /// Consecutive recoverable failures on one host before its circuit opens.
    pub host_break_threshold: usize,
    /// How long a host's circuit stays open once tripped.
    #[serde(with = "humantime_serde")]
    pub host_break_duration: Duration,
    /// Cap on the decorrelated-jitter backoff the watch multiplexer uses to reconnect.
    #[serde(with = "humantime_serde")]
    pub watch_backoff_cap: Duration,
}

impl Default for FaultHandlingConfig {
    fn default() -> Self {
        FaultHandlingConfig {
            global_max_retries: 3,
            host_break_threshold: 3,
            host_break_duration: Duration::from_secs(5),
            watch_backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Top-level client configuration. Loadable from a TOML file via [`Config::from_file`]
/// or assembled programmatically with [`ConfigBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hosts: Vec<String>,
    pub credentials: Option<Credentials>,
    pub auth: Option<AuthConfig>,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    pub fault_handling: FaultHandlingConfig,
    /// Forwarded to `init_tracing()`; follows the same `RUST_LOG`-style filter syntax.
    pub log_level: String,
    /// Host order is not shuffled; used by tests that need reproducible host selection.
    pub deterministic_ordering: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hosts: Vec::new(),
            credentials: None,
            auth: None,
            dial_timeout: Duration::from_secs(30),
            fault_handling: FaultHandlingConfig::default(),
            log_level: "info".to_string(),
            deterministic_ordering: false,
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file, via the `config` crate, matching this
    /// codebase's own configuration idiom.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config, ClientError> {
        let path = path.as_ref();
        let raw = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| ClientError::Config(format!("loading {}: {e}", path.display())))?;
        let cfg: Config = raw
            .try_deserialize()
            .map_err(|e| ClientError::Config(format!("parsing {}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fail-fast validation: rejects empty `hosts`, mixed `http`/`https` schemes, and a
    /// zero `dial_timeout`.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.hosts.is_empty() {
            return Err(ClientError::Config("at least one host is required".into()));
        }
        if self.dial_timeout.is_zero() {
            return Err(ClientError::Config("dial_timeout must be non-zero".into()));
        }

        let mut saw_http = false;
        let mut saw_https = false;
        for host in &self.hosts {
            if host.starts_with("https://") {
                saw_https = true;
            } else if host.starts_with("http://") {
                saw_http = true;
            }
        }
        if saw_http && saw_https {
            return Err(ClientError::Config(
                "hosts mix http:// and https:// schemes; pick one transport".into(),
            ));
        }
        if saw_https && self.credentials.is_none() {
            // Allowed: tonic can still dial TLS using the platform's trust roots.
        }
        Ok(())
    }
}

/// Programmatic builder mirroring [`Config`]'s fields with fluent setters, for
/// call sites that do not load a TOML file.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder { config: Config::default() }
    }

    pub fn hosts(mut self, hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    pub fn auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.auth = Some(AuthConfig { username: username.into(), password: password.into() });
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout = timeout;
        self
    }

    pub fn fault_handling(mut self, fault_handling: FaultHandlingConfig) -> Self {
        self.config.fault_handling = fault_handling;
        self
    }

    pub fn deterministic_ordering(mut self, deterministic: bool) -> Self {
        self.config.deterministic_ordering = deterministic;
        self
    }

    pub fn build(self) -> Result<Config, ClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_hosts() {
        let err = ConfigBuilder::new().build().unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn rejects_mixed_schemes() {
        let err = ConfigBuilder::new()
            .hosts(["http://a:2379", "https://b:2379"])
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn rejects_zero_dial_timeout() {
        let err = ConfigBuilder::new()
            .hosts(["http://a:2379"])
            .dial_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn accepts_sane_config() {
        let cfg = ConfigBuilder::new().hosts(["http://a:2379", "http://b:2379"]).build().unwrap();
        assert_eq!(cfg.hosts.len(), 2);
    }
}
