//! Scripted doubles shared by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use detour_common::protocol::error::{DetourError, Result};
use detour_common::{CandidateEndpoint, InterceptedRequest, Origin};
use http::{Response, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::health::Probe;
use crate::router::Fetcher;

pub fn origin(s: &str) -> Origin {
    Origin::parse(s).unwrap()
}

pub fn candidates(origins: &[&str]) -> Arc<[CandidateEndpoint]> {
    CandidateEndpoint::from_origins(origins.iter().map(|o| origin(o))).into()
}

fn key(url: &Url) -> String {
    url.origin().ascii_serialization()
}

#[derive(Debug, Clone, Copy)]
pub enum ProbeBehavior {
    Up,
    Fail,
    Hang,
    Panic,
}

/// Probe whose outcome per origin is set by the test. Unknown origins are up.
#[derive(Default)]
pub struct ScriptedProbe {
    behavior: Mutex<HashMap<String, ProbeBehavior>>,
    calls: Mutex<Vec<Url>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, origin: &str, behavior: ProbeBehavior) {
        self.behavior
            .lock()
            .unwrap()
            .insert(origin.to_string(), behavior);
    }

    pub fn calls_for(&self, origin: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| key(url) == origin)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.to_string())
            .collect()
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, url: &Url) -> Result<()> {
        self.calls.lock().unwrap().push(url.clone());
        let behavior = self
            .behavior
            .lock()
            .unwrap()
            .get(&key(url))
            .copied()
            .unwrap_or(ProbeBehavior::Up);

        match behavior {
            ProbeBehavior::Up => Ok(()),
            ProbeBehavior::Fail => Err(DetourError::Transport("connection refused".to_string())),
            ProbeBehavior::Hang => futures::future::pending().await,
            ProbeBehavior::Panic => panic!("probe exploded"),
        }
    }
}

/// Fetcher that answers `200 <origin>` unless an origin is marked down.
#[derive(Default)]
pub struct ScriptedFetcher {
    down: Mutex<Vec<String>>,
    fetched: Mutex<Vec<Url>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn down(&self, origin: &str) {
        self.down.lock().unwrap().push(origin.to_string());
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.to_string())
            .collect()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<Response<Bytes>> {
        self.fetched.lock().unwrap().push(request.url.clone());
        let origin = key(&request.url);
        if self.down.lock().unwrap().contains(&origin) {
            return Err(DetourError::Transport(format!("{} unreachable", origin)));
        }
        let mut response = Response::new(Bytes::from(origin));
        *response.status_mut() = StatusCode::OK;
        Ok(response)
    }
}
