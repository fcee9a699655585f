//! Cache Lifecycle Manager
//!
//! Owns the versioned cache namespace. A new version is installed, then
//! activated: activation deletes every namespace that does not belong to
//! the current version and claims all open sessions.
//!
//! Installing marks the version as eligible to activate straight away,
//! without waiting for sessions of the previous version to close. A
//! version that was never installed installs as the first step of its
//! activation. Each transition runs as its own task and hands back the
//! `JoinHandle`; the transition is finished only once that task completes.

use detour_common::protocol::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::store::CacheStore;

/// Phase of the agent's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    Installed,
    Activating,
    Active,
}

/// A named, versioned storage area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNamespace {
    pub name: String,
    pub version: String,
}

impl CacheNamespace {
    /// `{prefix}-{version}`, e.g. `app-v2`.
    pub fn for_version(prefix: &str, version: &str) -> Self {
        Self {
            name: format!("{}-{}", prefix, version),
            version: version.to_string(),
        }
    }
}

/// Per-namespace outcome of an activation or purge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub kept: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl ActivationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// One line per failed namespace, `name: reason`.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        Some(
            self.failed
                .iter()
                .map(|(name, reason)| format!("{}: {}", name, reason))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Tracks which version controls the open sessions.
///
/// Sessions subscribe and observe the controlling version change the
/// moment a new version claims them.
#[derive(Debug)]
pub struct SessionRegistry {
    controller: watch::Sender<Option<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (controller, _) = watch::channel(None);
        Self { controller }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.controller.subscribe()
    }

    /// Makes `version` the controller of every current and future session.
    pub fn claim(&self, version: &str) {
        self.controller.send_replace(Some(version.to_string()));
    }

    pub fn controller(&self) -> Option<String> {
        self.controller.borrow().clone()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the install and activate transitions of one version.
///
/// The manager owns the version's [`CacheNamespace`] and the
/// [`SessionRegistry`] it claims on activation. It is shared behind an
/// `Arc` so each transition can run on its own task.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> detour_common::protocol::error::Result<()> {
/// use detour_agent::{CacheLifecycleManager, CacheNamespace, MemoryCacheStore};
/// use std::sync::Arc;
///
/// let lifecycle = Arc::new(CacheLifecycleManager::new(
///     Arc::new(MemoryCacheStore::new()),
///     CacheNamespace::for_version("app", "v2"),
/// ));
/// let report = lifecycle.start().await?;
/// assert!(report.is_clean());
/// # Ok(())
/// # }
/// ```
pub struct CacheLifecycleManager {
    store: Arc<dyn CacheStore>,
    namespace: CacheNamespace,
    state: RwLock<LifecycleState>,
    skip_waiting: AtomicBool,
    sessions: SessionRegistry,
}

impl CacheLifecycleManager {
    pub fn new(store: Arc<dyn CacheStore>, namespace: CacheNamespace) -> Self {
        Self {
            store,
            namespace,
            state: RwLock::new(LifecycleState::Installing),
            skip_waiting: AtomicBool::new(false),
            sessions: SessionRegistry::new(),
        }
    }

    pub fn namespace(&self) -> &CacheNamespace {
        &self.namespace
    }

    pub fn version(&self) -> &str {
        &self.namespace.version
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Whether the installed version may activate without waiting.
    pub fn skips_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    /// Install transition: creates the current namespace and makes the
    /// version immediately eligible to activate.
    pub fn install(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_install().await })
    }

    /// Activate transition: deletes stale namespaces, then claims sessions.
    pub fn activate(self: &Arc<Self>) -> JoinHandle<ActivationReport> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_activate().await })
    }

    /// Runs install then activate, awaiting both.
    pub async fn start(self: &Arc<Self>) -> Result<ActivationReport> {
        match self.install().await {
            Ok(result) => result?,
            Err(e) => warn!("Install task for {} aborted: {}", self.namespace.name, e),
        }
        Ok(self.await_activation().await)
    }

    /// Runs the whole install then activate transition right away.
    ///
    /// # Behavior
    ///
    /// The current namespace is (re)created before stale ones are deleted,
    /// so a version whose namespace was purged ends up with it again. An
    /// already active version stays `Active` throughout the install step.
    pub async fn force_activate(self: &Arc<Self>) -> Result<ActivationReport> {
        self.start().await
    }

    async fn await_activation(self: &Arc<Self>) -> ActivationReport {
        match self.activate().await {
            Ok(report) => report,
            Err(e) => {
                warn!("Activation task for {} aborted: {}", self.namespace.name, e);
                ActivationReport::default()
            }
        }
    }

    async fn run_install(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if !is_activated(*state) {
                *state = LifecycleState::Installing;
            }
        }

        self.store.open(&self.namespace.name).await?;
        self.skip_waiting.store(true, Ordering::Release);

        // A concurrent activation may have finished meanwhile.
        let mut state = self.state.write().await;
        if *state == LifecycleState::Installing {
            *state = LifecycleState::Installed;
        }
        info!("Installed cache namespace {}", self.namespace.name);
        Ok(())
    }

    async fn run_activate(&self) -> ActivationReport {
        if !self.skips_waiting() {
            if let Err(e) = self.run_install().await {
                warn!(
                    "Install of {} before activation failed: {}",
                    self.namespace.name, e
                );
            }
        }
        *self.state.write().await = LifecycleState::Activating;

        let current = self.namespace.name.clone();
        let report = self.delete_where(|name| name != current).await;

        self.sessions.claim(&self.namespace.version);
        *self.state.write().await = LifecycleState::Active;
        info!(
            "Activated version {} (deleted {} stale namespace(s), {} failure(s))",
            self.namespace.version,
            report.deleted.len(),
            report.failed.len()
        );
        report
    }

    /// Deletes every namespace, including the current one.
    pub async fn purge_all(&self) -> ActivationReport {
        let report = self.delete_where(|_| true).await;
        info!("Purged {} cache namespace(s)", report.deleted.len());
        report
    }

    // Failures are recorded per namespace and never stop the others.
    async fn delete_where(&self, stale: impl Fn(&str) -> bool) -> ActivationReport {
        let mut report = ActivationReport::default();

        let names = match self.store.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!("Failed to enumerate cache namespaces: {}", e);
                report.failed.push(("*".to_string(), e.to_string()));
                return report;
            }
        };

        for name in names {
            if !stale(&name) {
                report.kept.push(name);
                continue;
            }
            match self.store.delete(&name).await {
                Ok(_) => {
                    info!("Deleted cache namespace {}", name);
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!("Failed to delete cache namespace {}: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        report
    }
}

fn is_activated(state: LifecycleState) -> bool {
    matches!(state, LifecycleState::Activating | LifecycleState::Active)
}
