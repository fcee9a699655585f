use detour_common::{CandidateEndpoint, Origin};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use url::Host;

use crate::health::HealthCache;

/// Decides whether an origin is a local or development origin. Matching
/// origins are never failed over.
#[derive(Clone)]
pub struct BypassPredicate(Arc<dyn Fn(&Origin) -> bool + Send + Sync>);

impl BypassPredicate {
    pub fn new(predicate: impl Fn(&Origin) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Matches local development origins, see [`is_local_origin`].
    pub fn local() -> Self {
        Self::new(is_local_origin)
    }

    /// Matches nothing; failover applies everywhere.
    pub fn never() -> Self {
        Self::new(|_| false)
    }

    pub fn matches(&self, origin: &Origin) -> bool {
        (self.0)(origin)
    }
}

impl Default for BypassPredicate {
    fn default() -> Self {
        Self::local()
    }
}

impl fmt::Debug for BypassPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BypassPredicate")
    }
}

/// `localhost`, `*.localhost`, `*.local`, and loopback, private or
/// unspecified IP addresses.
pub fn is_local_origin(origin: &Origin) -> bool {
    match origin.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost") || domain.ends_with(".local")
        }
        Some(Host::Ipv4(ip)) => ip.is_loopback() || ip.is_private() || ip.is_unspecified(),
        Some(Host::Ipv6(ip)) => ip.is_loopback() || ip.is_unspecified(),
        None => false,
    }
}

/// Picks the endpoint that should serve the next request.
pub struct EndpointResolver {
    candidates: Arc<[CandidateEndpoint]>,
    health: Arc<HealthCache>,
    bypass: BypassPredicate,
}

impl EndpointResolver {
    /// Creates a resolver over `candidates`, which must be sorted by
    /// priority.
    pub fn new(
        candidates: Arc<[CandidateEndpoint]>,
        health: Arc<HealthCache>,
        bypass: BypassPredicate,
    ) -> Self {
        Self {
            candidates,
            health,
            bypass,
        }
    }

    pub fn candidates(&self) -> &[CandidateEndpoint] {
        &self.candidates
    }

    pub fn is_candidate(&self, origin: &Origin) -> bool {
        self.candidates.iter().any(|c| &c.origin == origin)
    }

    /// Resolves the endpoint for a request currently aimed at
    /// `current_origin`.
    ///
    /// # Arguments
    /// * `current_origin` - Origin the request was originally sent to
    ///
    /// # Returns
    /// The origin the request should be sent to. Never fails.
    ///
    /// # Behavior
    /// - Bypassed origins are returned unchanged, without probing
    /// - The primary is returned unchanged, without probing
    /// - Otherwise candidates are probed one at a time in priority order and
    ///   the first available one wins
    /// - When none is available the current origin is returned unchanged
    pub async fn resolve(&self, current_origin: &Origin) -> Origin {
        if self.bypass.matches(current_origin) {
            debug!("Bypassing failover for local origin {}", current_origin);
            return current_origin.clone();
        }

        // The primary is trusted while it is in use; it is only probed when
        // reached from another origin.
        if self
            .candidates
            .first()
            .is_some_and(|primary| &primary.origin == current_origin)
        {
            return current_origin.clone();
        }

        for candidate in self.candidates.iter() {
            if self.health.check_availability(&candidate.origin).await {
                if &candidate.origin != current_origin {
                    info!(
                        "Routing {} to candidate {} (priority {})",
                        current_origin, candidate.origin, candidate.priority
                    );
                }
                return candidate.origin.clone();
            }
        }

        debug!("No candidate available, keeping {}", current_origin);
        current_origin.clone()
    }
}
