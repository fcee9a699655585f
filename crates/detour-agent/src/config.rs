use detour_common::protocol::error::{DetourError, Result};
use detour_common::{CandidateEndpoint, Origin};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::health::HealthCheckConfig;
use crate::router::default_denylist;

/// Agent configuration.
///
/// Can be built in code with the `with_*` methods or loaded from a JSON
/// file; missing fields take their defaults.
///
/// # Example
/// ```
/// use detour_agent::AgentConfig;
/// use detour_common::Origin;
///
/// let config = AgentConfig::new(vec![
///     Origin::parse("https://app.example").unwrap(),
///     Origin::parse("https://mirror.example").unwrap(),
/// ])
/// .with_version("2024.06.1")
/// .with_health_ttl_secs(60);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Origin of the hosting application. Defaults to the primary candidate.
    pub origin: Option<Origin>,
    /// Candidate origins in priority order; the first is the primary.
    pub candidates: Vec<Origin>,
    /// Version tag for the cache namespace and version queries.
    pub version: String,
    /// Prefix of cache namespace names.
    pub cache_prefix: String,
    /// Directory for the disk-backed cache store; in-memory when unset.
    pub cache_dir: Option<PathBuf>,
    /// Path probed under each candidate.
    pub health_path: String,
    /// How long a probe verdict is trusted, in seconds.
    pub health_ttl_secs: u64,
    /// Hard limit on a single probe, in milliseconds.
    pub probe_timeout_ms: u64,
    /// Disable failover for local and development origins.
    pub bypass_local: bool,
    /// URL substrings that are never rerouted.
    pub denylist: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let health = HealthCheckConfig::default();
        Self {
            origin: None,
            candidates: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache_prefix: "detour".to_string(),
            cache_dir: None,
            health_path: health.health_path,
            health_ttl_secs: health.ttl.as_secs(),
            probe_timeout_ms: health.timeout.as_millis() as u64,
            bypass_local: true,
            denylist: default_denylist(),
        }
    }
}

impl AgentConfig {
    pub fn new(candidates: Vec<Origin>) -> Self {
        Self {
            candidates,
            ..Self::default()
        }
    }

    /// Loads a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DetourError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| DetourError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = prefix.into();
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    pub fn with_health_ttl_secs(mut self, secs: u64) -> Self {
        self.health_ttl_secs = secs;
        self
    }

    pub fn with_probe_timeout_ms(mut self, ms: u64) -> Self {
        self.probe_timeout_ms = ms;
        self
    }

    pub fn with_bypass_local(mut self, enabled: bool) -> Self {
        self.bypass_local = enabled;
        self
    }

    pub fn with_denylist(mut self, denylist: Vec<String>) -> Self {
        self.denylist = denylist;
        self
    }

    /// Checks the configuration for values the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.candidates.is_empty() {
            return Err(DetourError::Config(
                "at least one candidate endpoint is required".to_string(),
            ));
        }
        if !self.health_path.starts_with('/') {
            return Err(DetourError::Config(format!(
                "health path '{}' must start with '/'",
                self.health_path
            )));
        }
        if self.version.trim().is_empty() {
            return Err(DetourError::Config("version tag is empty".to_string()));
        }
        if self.cache_prefix.is_empty() || self.cache_prefix.contains(['/', '\\']) {
            return Err(DetourError::Config(format!(
                "invalid cache prefix '{}'",
                self.cache_prefix
            )));
        }
        if self.health_ttl_secs == 0 || self.probe_timeout_ms == 0 {
            return Err(DetourError::Config(
                "health TTL and probe timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The application origin, falling back to the primary candidate.
    pub fn scope(&self) -> Result<Origin> {
        self.origin
            .clone()
            .or_else(|| self.candidates.first().cloned())
            .ok_or_else(|| DetourError::Config("no origin configured".to_string()))
    }

    pub fn candidate_endpoints(&self) -> Vec<CandidateEndpoint> {
        CandidateEndpoint::from_origins(self.candidates.iter().cloned())
    }

    pub fn health_check(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            health_path: self.health_path.clone(),
            ttl: Duration::from_secs(self.health_ttl_secs),
            timeout: Duration::from_millis(self.probe_timeout_ms),
        }
    }
}
