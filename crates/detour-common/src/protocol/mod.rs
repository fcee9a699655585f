pub mod control;
pub mod endpoint;
pub mod error;
pub mod request;

#[cfg(test)]
mod tests;

pub use control::{ControlMessage, ControlReply, DomainStatus};
pub use endpoint::{CandidateEndpoint, Origin};
pub use error::{DetourError, Result};
pub use request::{InterceptedRequest, RequestKind};
