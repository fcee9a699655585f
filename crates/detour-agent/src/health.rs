//! Health Probe & Cache
//!
//! A probe is a short, read-only request against a well-known path under a
//! candidate origin. Any response at all counts as "available": the status
//! is ignored because cross-origin responses may be unreadable. Errors and
//! timeouts count as "unavailable". Verdicts are cached per origin and
//! trusted until they are older than the TTL.

use async_trait::async_trait;
use detour_common::protocol::error::{DetourError, Result};
use detour_common::Origin;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::clock::Clock;

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Path probed under each candidate origin.
    pub health_path: String,
    /// How long a verdict is trusted.
    pub ttl: Duration,
    /// Hard limit on a single probe.
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            health_path: "/favicon.ico".to_string(),
            ttl: Duration::from_secs(5 * 60),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Reachability check against a single URL.
///
/// `Ok(())` means the endpoint answered; the status code is irrelevant.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &Url) -> Result<()>;
}

/// Probe that issues an uncached `HEAD` request.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("detour-probe/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &Url) -> Result<()> {
        self.client
            .head(url.clone())
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await?;
        Ok(())
    }
}

/// Last known verdict for one origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthRecord {
    pub endpoint: Origin,
    pub available: bool,
    pub checked_at: Instant,
}

impl HealthRecord {
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.checked_at) < ttl
    }
}

/// TTL-bounded cache of probe verdicts.
///
/// Concurrent writers simply overwrite each other; a lost write only costs
/// freshness.
pub struct HealthCache {
    records: RwLock<HashMap<Origin, HealthRecord>>,
    probe: Arc<dyn Probe>,
    clock: Arc<dyn Clock>,
    config: HealthCheckConfig,
}

impl HealthCache {
    pub fn new(probe: Arc<dyn Probe>, clock: Arc<dyn Clock>, config: HealthCheckConfig) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            probe,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Checks whether `endpoint` is reachable.
    ///
    /// # Arguments
    /// * `endpoint` - Origin to check
    ///
    /// # Returns
    /// `true` when the endpoint answered its last probe. Errors, timeouts
    /// and panics in the probe all count as unavailable.
    ///
    /// # Behavior
    /// - A record younger than the TTL is returned without probing
    /// - Otherwise the endpoint is probed and the outcome recorded
    pub async fn check_availability(&self, endpoint: &Origin) -> bool {
        if let Some(record) = self.fresh_record(endpoint).await {
            debug!(
                "Using cached verdict for {}: available={}",
                endpoint, record.available
            );
            return record.available;
        }

        self.probe_now(endpoint).await
    }

    /// Probes `endpoint` regardless of any cached verdict and records the
    /// outcome. Never fails.
    pub async fn probe_now(&self, endpoint: &Origin) -> bool {
        let available = match self.run_probe(endpoint).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Health probe for {} failed: {}", endpoint, e);
                false
            }
        };

        let record = HealthRecord {
            endpoint: endpoint.clone(),
            available,
            checked_at: self.clock.now(),
        };
        self.records.write().await.insert(endpoint.clone(), record);

        available
    }

    async fn run_probe(&self, endpoint: &Origin) -> Result<()> {
        let url = endpoint.join(&self.config.health_path)?;
        let timeout = self.config.timeout;

        let probe = AssertUnwindSafe(self.probe.probe(&url)).catch_unwind();
        match tokio::time::timeout(timeout, probe).await {
            Err(_) => Err(DetourError::Timeout(timeout.as_millis() as u64)),
            Ok(Err(_)) => Err(DetourError::Transport(format!("probe of {} panicked", url))),
            Ok(Ok(result)) => result,
        }
    }

    async fn fresh_record(&self, endpoint: &Origin) -> Option<HealthRecord> {
        let records = self.records.read().await;
        let record = records.get(endpoint)?;
        record
            .is_fresh(self.clock.now(), self.config.ttl)
            .then(|| record.clone())
    }

    /// Returns the stored record for `endpoint`, fresh or not.
    pub async fn record(&self, endpoint: &Origin) -> Option<HealthRecord> {
        self.records.read().await.get(endpoint).cloned()
    }

    /// Drops every cached verdict.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
