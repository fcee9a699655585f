//! Detour Common Types
//!
//! Shared data model and control protocol for the detour failover agent.
//!
//! # Overview
//!
//! Detour sits between an application's outbound requests and the network.
//! When the primary backend origin is unreachable it reroutes requests to
//! the first healthy alternate origin. This crate holds the pieces every
//! component agrees on:
//!
//! - **Endpoints**: [`Origin`] and [`CandidateEndpoint`]
//! - **Requests**: [`InterceptedRequest`] and [`RequestKind`]
//! - **Control protocol**: [`ControlMessage`] and [`ControlReply`]
//! - **Errors**: [`DetourError`] and the crate-wide [`Result`] alias
//!
//! # Example
//!
//! ```
//! use detour_common::Origin;
//! use url::Url;
//!
//! let mirror = Origin::parse("https://mirror.example").unwrap();
//! let url = Url::parse("https://app.example/quotes?symbol=ABC#top").unwrap();
//! let rewritten = mirror.rewrite(&url).unwrap();
//! assert_eq!(rewritten.as_str(), "https://mirror.example/quotes?symbol=ABC#top");
//! ```

pub mod protocol;

pub use protocol::*;
