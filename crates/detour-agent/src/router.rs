//! Request Router
//!
//! Every outbound request passes through [`RequestRouter::route`], which
//! walks a small state machine:
//!
//! ```text
//! Filtering ──excluded──────────────────────────────▶ pass through
//!     │
//!     ▼
//! Resolving ──document on another endpoint──────────▶ 302 redirect
//!     │
//!     ▼
//! Forwarding(rewritten) ──error──▶ Forwarding(direct) ──error──▶ Fallback
//!     │                                  │
//!     └────────────ok────────────────────┴──────────▶ response
//! ```
//!
//! Network failures of included requests never escape: they end in a
//! synthesized fallback response.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use detour_common::protocol::error::Result;
use detour_common::{CandidateEndpoint, InterceptedRequest, Origin};
use http::{header, Response};
use std::sync::Arc;
use tracing::{debug, warn};
use url::{Position, Url};

use crate::fallback;
use crate::resolver::EndpointResolver;

/// Performs the real network request.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<Response<Bytes>>;
}

// Hop-by-hop headers are connection-scoped and never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request header marking a fetch made by the agent. A proxied request
/// that already carries it has looped back into an agent.
pub const HOP_HEADER: &str = "x-detour-hop";

fn is_forwardable(name: &header::HeaderName) -> bool {
    name != header::HOST && !HOP_BY_HOP.contains(&name.as_str())
}

/// Fetcher backed by a shared `reqwest` client.
///
/// Redirects are handed back to the caller rather than followed, and no
/// timeout is applied beyond the client defaults.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<Response<Bytes>> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in request.headers.iter().filter(|(n, _)| is_forwardable(n)) {
            builder = builder.header(name, value);
        }
        builder = builder.header(HOP_HEADER, "1");
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let upstream = builder.send().await?;

        let mut response = Response::builder().status(upstream.status());
        for (name, value) in upstream.headers().iter().filter(|(n, _)| is_forwardable(n)) {
            response = response.header(name, value);
        }
        let body = upstream.bytes().await?;
        Ok(response.body(body)?)
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Origin of the hosting application; same-origin requests are eligible
    /// for rerouting.
    pub scope: Origin,
    /// URL substrings identifying browser-internal or injected requests.
    pub denylist: Vec<String>,
    /// Path probed by the fallback page before navigating.
    pub health_path: String,
}

/// Requests matching any of these are never rerouted.
pub fn default_denylist() -> Vec<String> {
    [
        "chrome-extension://",
        "moz-extension://",
        "safari-extension://",
        "/__webpack_hmr",
        ".hot-update.",
        "/sockjs-node",
        "/@vite/",
        "/cdn-cgi/",
        "/__detour/",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// States of a single routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteState {
    Filtering,
    Resolving,
    /// Fetching `target`; `retry_direct` is set when `target` is a rewrite
    /// and the original URL should be tried next.
    Forwarding { target: Url, retry_direct: bool },
    Fallback,
}

/// How the router disposed of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Excluded; forwarded untouched.
    PassedThrough,
    /// Served by the endpoint it was addressed to.
    Direct,
    /// Document redirected to another endpoint.
    Redirected,
    /// Served by another endpoint.
    Rewritten,
    /// Synthesized fallback response.
    Fallback,
}

/// The response together with the path that produced it.
#[derive(Debug)]
pub struct Routed {
    pub response: Response<Bytes>,
    pub disposition: Disposition,
}

/// Central dispatcher for intercepted requests.
pub struct RequestRouter {
    resolver: Arc<EndpointResolver>,
    fetcher: Arc<dyn Fetcher>,
    config: RouterConfig,
}

impl RequestRouter {
    pub fn new(
        resolver: Arc<EndpointResolver>,
        fetcher: Arc<dyn Fetcher>,
        config: RouterConfig,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            config,
        }
    }

    pub fn candidates(&self) -> &[CandidateEndpoint] {
        self.resolver.candidates()
    }

    /// Returns `true` when the request must be passed through untouched.
    pub fn is_excluded(&self, request: &InterceptedRequest) -> bool {
        if !request.is_safe_read() {
            return true;
        }

        let in_scope = match request.origin() {
            Ok(origin) => origin == self.config.scope || self.resolver.is_candidate(&origin),
            Err(_) => false,
        };
        if !in_scope {
            return true;
        }

        let url = request.url.as_str();
        self.config
            .denylist
            .iter()
            .any(|pattern| url.contains(pattern.as_str()))
    }

    /// Routes a request.
    ///
    /// # Errors
    ///
    /// Only excluded requests can fail: their fetch errors are returned to
    /// the caller as they would have been without the router.
    pub async fn route(&self, request: &InterceptedRequest) -> Result<Response<Bytes>> {
        Ok(self.route_traced(request).await?.response)
    }

    /// Like [`route`](Self::route) but also reports the disposition.
    pub async fn route_traced(&self, request: &InterceptedRequest) -> Result<Routed> {
        let mut state = RouteState::Filtering;

        loop {
            state = match state {
                RouteState::Filtering => {
                    if self.is_excluded(request) {
                        debug!("Passing through {} {}", request.method, request.url);
                        let response = self.fetcher.fetch(request).await?;
                        return Ok(Routed {
                            response,
                            disposition: Disposition::PassedThrough,
                        });
                    }
                    RouteState::Resolving
                }
                RouteState::Resolving => {
                    let current = request.origin()?;
                    let resolved = self.resolver.resolve(&current).await;

                    if resolved == current {
                        RouteState::Forwarding {
                            target: request.url.clone(),
                            retry_direct: false,
                        }
                    } else {
                        let target = resolved.rewrite(&request.url)?;
                        if request.is_document() {
                            debug!("Redirecting document {} to {}", request.url, target);
                            return Ok(Routed {
                                response: fallback::redirect(target.as_str()),
                                disposition: Disposition::Redirected,
                            });
                        }
                        RouteState::Forwarding {
                            target,
                            retry_direct: true,
                        }
                    }
                }
                RouteState::Forwarding {
                    target,
                    retry_direct,
                } => {
                    let direct = target == request.url;
                    let attempt = if direct {
                        self.fetcher.fetch(request).await
                    } else {
                        self.fetcher.fetch(&request.retarget(target.clone())).await
                    };

                    match attempt {
                        Ok(response) => {
                            let disposition = if direct {
                                Disposition::Direct
                            } else {
                                Disposition::Rewritten
                            };
                            return Ok(Routed {
                                response,
                                disposition,
                            });
                        }
                        Err(e) => {
                            warn!("Fetch of {} failed: {}", target, e);
                            if retry_direct {
                                RouteState::Forwarding {
                                    target: request.url.clone(),
                                    retry_direct: false,
                                }
                            } else {
                                RouteState::Fallback
                            }
                        }
                    }
                }
                RouteState::Fallback => {
                    return Ok(Routed {
                        response: self.fallback_response(request)?,
                        disposition: Disposition::Fallback,
                    });
                }
            };
        }
    }

    fn fallback_response(&self, request: &InterceptedRequest) -> Result<Response<Bytes>> {
        if !request.is_document() {
            return Ok(fallback::unavailable());
        }

        let current = request.origin()?;
        let tail = &request.url[Position::BeforePath..];
        Ok(fallback::offline_page(
            self.resolver.candidates(),
            &current,
            tail,
            &self.config.health_path,
            Utc::now(),
        ))
    }
}
