//! Control protocol between the hosting application and the agent.
//!
//! | Message          | Reply                                   |
//! |------------------|-----------------------------------------|
//! | `FORCE_ACTIVATE` | none                                    |
//! | `VERSION_QUERY`  | `{version}`                             |
//! | `ENDPOINT_SWEEP` | `{domains: [{domain, available}]}`      |
//! | `PURGE`          | `{success, error?}`                     |
//!
//! Any handler failure is reported as `{error}`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    ForceActivate,
    VersionQuery,
    EndpointSweep,
    Purge,
}

impl ControlMessage {
    /// Whether the sender should wait for a reply.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, ControlMessage::ForceActivate)
    }
}

/// Availability of one candidate as reported by a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStatus {
    pub domain: String,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlReply {
    Version {
        version: String,
    },
    Sweep {
        domains: Vec<DomainStatus>,
    },
    Purge {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        error: String,
    },
}

impl ControlReply {
    pub fn error(message: impl Into<String>) -> Self {
        ControlReply::Error {
            error: message.into(),
        }
    }

    pub fn purged() -> Self {
        ControlReply::Purge {
            success: true,
            error: None,
        }
    }

    pub fn purge_failed(message: impl Into<String>) -> Self {
        ControlReply::Purge {
            success: false,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ControlReply::Error { .. } | ControlReply::Purge { success: false, .. }
        )
    }
}
