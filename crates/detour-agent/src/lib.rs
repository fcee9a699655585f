//! Detour agent: client-resident failover routing.
//!
//! The agent sits between an application and the network. Requests for
//! the application's own origin are steered to the highest-priority
//! candidate endpoint that answers a health probe, navigations are
//! redirected, and total outages end in a self-retrying offline page.
//! A versioned cache lifecycle and a small control protocol run alongside.

pub mod agent;
pub mod clock;
pub mod config;
pub mod control;
pub mod fallback;
pub mod health;
pub mod http_server;
pub mod lifecycle;
pub mod resolver;
pub mod router;
pub mod store;

#[cfg(test)]
mod test_support;

pub use agent::{Agent, Components};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AgentConfig;
pub use control::{ControlChannel, ControlHandle};
pub use health::{HealthCache, HealthCheckConfig, HealthRecord, HttpProbe, Probe};
pub use http_server::{HttpServer, CONTROLLER_HEADER, CONTROL_PATH};
pub use lifecycle::{
    ActivationReport, CacheLifecycleManager, CacheNamespace, LifecycleState, SessionRegistry,
};
pub use resolver::{BypassPredicate, EndpointResolver};
pub use router::{
    Disposition, Fetcher, HttpFetcher, RequestRouter, RouterConfig, Routed, HOP_HEADER,
};
pub use store::{CacheStore, DiskCacheStore, MemoryCacheStore};
