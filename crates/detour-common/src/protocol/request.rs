use bytes::Bytes;
use http::{HeaderMap, Method};
use url::Url;

use super::endpoint::Origin;
use super::error::Result;

/// What the hosting application is loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A top-level page navigation.
    Document,
    /// Anything else: scripts, images, API calls.
    Resource,
}

/// An outbound request captured on its way to the network.
///
/// Scoped to a single routing decision.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub url: Url,
    pub method: Method,
    pub kind: RequestKind,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InterceptedRequest {
    pub fn new(method: Method, url: Url, kind: RequestKind) -> Self {
        Self {
            url,
            method,
            kind,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Convenience constructor for a `GET` of a sub-resource.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, RequestKind::Resource)
    }

    /// Convenience constructor for a page navigation.
    pub fn document(url: Url) -> Self {
        Self::new(Method::GET, url, RequestKind::Document)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn is_document(&self) -> bool {
        self.kind == RequestKind::Document
    }

    /// Safe read methods are the only ones eligible for rerouting.
    pub fn is_safe_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    pub fn origin(&self) -> Result<Origin> {
        Origin::of(&self.url)
    }

    /// Returns a copy of this request aimed at `url`.
    pub fn retarget(&self, url: Url) -> Self {
        Self {
            url,
            ..self.clone()
        }
    }
}
