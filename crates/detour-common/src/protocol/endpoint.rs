//! Origins and candidate endpoints.
//!
//! An [`Origin`] is the `scheme://host[:port]` part of a URL. Candidate
//! endpoints are origins with a fixed priority; priority 0 is the primary.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::{Host, Position, Url};

use super::error::{DetourError, Result};

/// A normalized tuple origin (`scheme://host[:port]`).
///
/// Default ports are dropped, so `https://a.example:443` and
/// `https://a.example` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Origin {
    serialized: String,
    url: Url,
}

impl Origin {
    /// Parses an origin from any absolute URL string. Path, query and
    /// fragment are discarded.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input)?;
        Self::of(&url)
    }

    /// Extracts the origin of `url`.
    ///
    /// # Errors
    ///
    /// Returns `DetourError::InvalidUrl` for URLs with an opaque origin
    /// (`data:`, `blob:`, `file:` and similar).
    pub fn of(url: &Url) -> Result<Self> {
        let origin = url.origin();
        if !origin.is_tuple() {
            return Err(DetourError::InvalidUrl(format!(
                "'{}' has no tuple origin",
                url
            )));
        }
        let serialized = origin.ascii_serialization();
        let url = Url::parse(&serialized)?;
        Ok(Self { serialized, url })
    }

    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> Option<Host<&str>> {
        self.url.host()
    }

    /// Resolves `path` against this origin.
    pub fn join(&self, path: &str) -> Result<Url> {
        Ok(self.url.join(path)?)
    }

    /// Returns `true` when `url` belongs to this origin.
    pub fn matches(&self, url: &Url) -> bool {
        url.origin().ascii_serialization() == self.serialized
    }

    /// Rewrites `url` onto this origin.
    ///
    /// # Arguments
    /// * `url` - Absolute URL whose origin is replaced
    ///
    /// # Returns
    /// - `Ok(Url)` - Same path, query and fragment on this origin
    /// - `Err(DetourError::InvalidUrl)` - The rewritten URL failed to parse
    ///
    /// # Behavior
    /// Only the origin changes: everything from the path onwards is copied
    /// verbatim from the input serialization.
    pub fn rewrite(&self, url: &Url) -> Result<Url> {
        let tail = &url[Position::BeforePath..];
        Ok(Url::parse(&format!("{}{}", self.serialized, tail))?)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized)
    }
}

impl TryFrom<String> for Origin {
    type Error = DetourError;

    fn try_from(value: String) -> Result<Self> {
        Origin::parse(&value)
    }
}

impl From<Origin> for String {
    fn from(origin: Origin) -> Self {
        origin.serialized
    }
}

impl std::str::FromStr for Origin {
    type Err = DetourError;

    fn from_str(s: &str) -> Result<Self> {
        Origin::parse(s)
    }
}

/// A configured backend origin for the same logical service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEndpoint {
    pub origin: Origin,
    pub priority: usize,
}

impl CandidateEndpoint {
    pub fn new(origin: Origin, priority: usize) -> Self {
        Self { origin, priority }
    }

    pub fn is_primary(&self) -> bool {
        self.priority == 0
    }

    /// Builds the candidate list from origins in priority order.
    pub fn from_origins(origins: impl IntoIterator<Item = Origin>) -> Vec<Self> {
        origins
            .into_iter()
            .enumerate()
            .map(|(priority, origin)| Self { origin, priority })
            .collect()
    }
}
