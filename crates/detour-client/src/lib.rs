//! Client for the detour agent's control endpoint.

pub mod client;

pub use client::ControlClient;
