// Copyright 2025 Detour Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Detour CLI
//!
//! Command-line interface for the detour failover agent.
//!
//! - `detour serve`: run the agent as an HTTP forward proxy
//! - `detour version|sweep|purge|activate`: send one control message to a
//!   running agent and print the raw JSON reply
//!
//! Argument parsing lives in the binary; this crate holds the pieces the
//! binary and its tests share.

use anyhow::{anyhow, Context, Result};
use detour_agent::AgentConfig;
use detour_client::ControlClient;
use detour_common::{ControlMessage, Origin};
use std::path::PathBuf;

/// Environment variable overriding the version tag.
pub const VERSION_ENV: &str = "DETOUR_VERSION";

/// Environment variable overriding the cache directory.
pub const CACHE_DIR_ENV: &str = "DETOUR_CACHE_DIR";

/// Validates that a URL string starts with http:// or https://
pub fn validate_http_url(url: &str, description: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow!(
            "Invalid {}: '{}' must start with http:// or https://",
            description,
            url
        ))
    }
}

/// Settings given on the `serve` command line. Unset values fall through
/// to the environment, then the config file, then the defaults.
#[derive(Debug, Default, Clone)]
pub struct ServeOverrides {
    pub config: Option<PathBuf>,
    pub origin: Option<String>,
    pub endpoints: Vec<String>,
    pub version: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub health_path: Option<String>,
    pub ttl_secs: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub no_bypass_local: bool,
}

/// Builds the agent configuration, reading the environment through `env`.
pub fn resolve_config(
    overrides: ServeOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> Result<AgentConfig> {
    let mut config = match &overrides.config {
        Some(path) => AgentConfig::from_file(path)?,
        None => AgentConfig::default(),
    };

    if let Some(version) = env(VERSION_ENV) {
        config.version = version;
    }
    if let Some(dir) = env(CACHE_DIR_ENV) {
        config.cache_dir = Some(PathBuf::from(dir));
    }

    if !overrides.endpoints.is_empty() {
        config.candidates = overrides
            .endpoints
            .iter()
            .map(|endpoint| parse_origin(endpoint, "endpoint"))
            .collect::<Result<_>>()?;
    }
    if let Some(origin) = &overrides.origin {
        config.origin = Some(parse_origin(origin, "origin")?);
    }
    if let Some(version) = overrides.version {
        config.version = version;
    }
    if let Some(dir) = overrides.cache_dir {
        config.cache_dir = Some(dir);
    }
    if let Some(path) = overrides.health_path {
        config.health_path = path;
    }
    if let Some(secs) = overrides.ttl_secs {
        config.health_ttl_secs = secs;
    }
    if let Some(ms) = overrides.probe_timeout_ms {
        config.probe_timeout_ms = ms;
    }
    if overrides.no_bypass_local {
        config.bypass_local = false;
    }

    config.validate()?;
    Ok(config)
}

fn parse_origin(url: &str, description: &str) -> Result<Origin> {
    validate_http_url(url, description)?;
    Origin::parse(url).with_context(|| format!("Invalid {} '{}'", description, url))
}

/// Sends `message` to the agent and returns the reply as compact JSON.
///
/// Messages without a reply return `None`.
pub async fn run_control(agent_address: &str, message: ControlMessage) -> Result<Option<String>> {
    validate_http_url(agent_address, "agent address")?;

    let client = ControlClient::new(agent_address)?;
    match client.send(message).await? {
        Some(reply) => Ok(Some(serde_json::to_string(&reply)?)),
        None => Ok(None),
    }
}
