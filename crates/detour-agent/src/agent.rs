use bytes::Bytes;
use detour_common::protocol::error::Result;
use detour_common::{CandidateEndpoint, ControlMessage, ControlReply, InterceptedRequest};
use http::Response;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::AgentConfig;
use crate::control::{ControlChannel, ControlHandle};
use crate::health::{HealthCache, HttpProbe, Probe};
use crate::lifecycle::{ActivationReport, CacheLifecycleManager, CacheNamespace};
use crate::resolver::{BypassPredicate, EndpointResolver};
use crate::router::{Fetcher, HttpFetcher, RequestRouter, RouterConfig, Routed};
use crate::store::{CacheStore, DiskCacheStore, MemoryCacheStore};

/// The pluggable pieces an [`Agent`] is assembled from.
pub struct Components {
    pub probe: Arc<dyn Probe>,
    pub fetcher: Arc<dyn Fetcher>,
    pub store: Arc<dyn CacheStore>,
    pub clock: Arc<dyn Clock>,
    pub bypass: BypassPredicate,
}

impl Components {
    /// Production components: HTTP probe and fetcher, the system clock, and
    /// a disk store when a cache directory is configured.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let store: Arc<dyn CacheStore> = match &config.cache_dir {
            Some(dir) => Arc::new(DiskCacheStore::new(dir)),
            None => Arc::new(MemoryCacheStore::new()),
        };
        let bypass = if config.bypass_local {
            BypassPredicate::local()
        } else {
            BypassPredicate::never()
        };

        Ok(Self {
            probe: Arc::new(HttpProbe::new()?),
            fetcher: Arc::new(HttpFetcher::new()?),
            store,
            clock: Arc::new(SystemClock),
            bypass,
        })
    }
}

/// Detour agent: failover routing plus cache lifecycle.
///
/// Every outbound request goes through [`route`](Self::route). The agent
/// owns a single health cache shared by the resolver and the control
/// channel, and the lifecycle manager for its version's cache namespace.
///
/// # Example
/// ```no_run
/// # use detour_agent::{Agent, AgentConfig};
/// # use detour_common::Origin;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AgentConfig::new(vec![
///     Origin::parse("https://app.example")?,
///     Origin::parse("https://mirror.example")?,
/// ]);
/// let agent = Agent::new(config).await?;
/// agent.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct Agent {
    config: AgentConfig,
    health: Arc<HealthCache>,
    router: RequestRouter,
    lifecycle: Arc<CacheLifecycleManager>,
    control: ControlHandle,
    /// Listener task; kept so it lives as long as the agent.
    _control_task: JoinHandle<()>,
}

impl Agent {
    /// Creates an agent with production components.
    pub async fn new(config: AgentConfig) -> Result<Self> {
        let components = Components::from_config(&config)?;
        Self::with_components(config, components).await
    }

    /// Creates an agent from explicit components.
    ///
    /// # Arguments
    /// * `config` - Agent configuration; validated before anything is built
    /// * `components` - Probe, fetcher, store, clock and bypass predicate
    ///
    /// # Returns
    /// - `Ok(Agent)` - Agent with its control listener already running
    /// - `Err(DetourError::Config)` - The configuration is invalid
    ///
    /// # Behavior
    /// - Builds one health cache shared by the resolver and control channel
    /// - Names the cache namespace `{cache_prefix}-{version}`
    /// - Does not install or activate; call [`Agent::start`] for that
    pub async fn with_components(config: AgentConfig, components: Components) -> Result<Self> {
        config.validate()?;

        let candidates: Arc<[CandidateEndpoint]> = config.candidate_endpoints().into();
        let health = Arc::new(HealthCache::new(
            components.probe,
            components.clock,
            config.health_check(),
        ));
        let resolver = Arc::new(EndpointResolver::new(
            Arc::clone(&candidates),
            Arc::clone(&health),
            components.bypass,
        ));
        let router = RequestRouter::new(
            resolver,
            components.fetcher,
            RouterConfig {
                scope: config.scope()?,
                denylist: config.denylist.clone(),
                health_path: config.health_path.clone(),
            },
        );
        let lifecycle = Arc::new(CacheLifecycleManager::new(
            components.store,
            CacheNamespace::for_version(&config.cache_prefix, &config.version),
        ));
        let channel = Arc::new(ControlChannel::new(
            candidates,
            Arc::clone(&health),
            Arc::clone(&lifecycle),
        ));
        let (control, control_task) = channel.spawn();

        info!(
            "Agent {} initialized with {} candidate endpoint(s)",
            config.version,
            config.candidates.len()
        );

        Ok(Self {
            config,
            health,
            router,
            lifecycle,
            control,
            _control_task: control_task,
        })
    }

    /// Runs the install then activate transitions.
    pub async fn start(&self) -> Result<ActivationReport> {
        let report = self.lifecycle.start().await?;
        if let Some(summary) = report.failure_summary() {
            tracing::warn!("Activation finished with failures: {}", summary);
        }
        Ok(report)
    }

    pub async fn route(&self, request: &InterceptedRequest) -> Result<Response<Bytes>> {
        self.router.route(request).await
    }

    pub async fn route_traced(&self, request: &InterceptedRequest) -> Result<Routed> {
        self.router.route_traced(request).await
    }

    /// Sends a control message and waits for its reply, if any.
    pub async fn control(&self, message: ControlMessage) -> Result<Option<ControlReply>> {
        self.control.request(message).await
    }

    pub fn control_handle(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn health(&self) -> &Arc<HealthCache> {
        &self.health
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    pub fn lifecycle(&self) -> &Arc<CacheLifecycleManager> {
        &self.lifecycle
    }
}
