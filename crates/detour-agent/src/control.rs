//! Control Channel
//!
//! Message-passing interface used by the hosting application to query or
//! command the agent. Each message is handled in its own task; a failing
//! or panicking handler is reported back through the reply channel and
//! never takes the listener down.

use detour_common::protocol::error::{DetourError, Result};
use detour_common::{CandidateEndpoint, ControlMessage, ControlReply, DomainStatus};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::health::HealthCache;
use crate::lifecycle::CacheLifecycleManager;

/// Buffered messages before senders start waiting.
const CHANNEL_CAPACITY: usize = 64;

/// A message together with the channel its reply goes to.
#[derive(Debug)]
pub struct ControlEnvelope {
    pub message: ControlMessage,
    pub reply: Option<oneshot::Sender<ControlReply>>,
}

pub struct ControlChannel {
    candidates: Arc<[CandidateEndpoint]>,
    health: Arc<HealthCache>,
    lifecycle: Arc<CacheLifecycleManager>,
}

impl ControlChannel {
    pub fn new(
        candidates: Arc<[CandidateEndpoint]>,
        health: Arc<HealthCache>,
        lifecycle: Arc<CacheLifecycleManager>,
    ) -> Self {
        Self {
            candidates,
            health,
            lifecycle,
        }
    }

    /// Starts the listener and returns the handle used to send messages.
    pub fn spawn(self: Arc<Self>) -> (ControlHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(self.listen(rx));
        (ControlHandle { tx }, task)
    }

    async fn listen(self: Arc<Self>, mut rx: mpsc::Receiver<ControlEnvelope>) {
        while let Some(envelope) = rx.recv().await {
            let channel = Arc::clone(&self);
            tokio::spawn(async move {
                channel.handle(envelope.message, envelope.reply).await;
            });
        }
        debug!("Control channel closed");
    }

    /// Handles one message, replying when the message expects it.
    pub async fn handle(
        self: &Arc<Self>,
        message: ControlMessage,
        reply: Option<oneshot::Sender<ControlReply>>,
    ) {
        debug!("Handling control message {:?}", message);

        let channel = Arc::clone(self);
        let outcome = tokio::spawn(async move { channel.dispatch(message).await }).await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Control message {:?} failed: {}", message, e);
                Some(ControlReply::error(e.to_string()))
            }
            Err(e) => {
                warn!("Control handler for {:?} aborted: {}", message, e);
                Some(ControlReply::error(format!("handler aborted: {}", e)))
            }
        };

        if let (Some(response), Some(reply)) = (response, reply) {
            if reply.send(response).is_err() {
                debug!("Reply to {:?} dropped, requester went away", message);
            }
        }
    }

    async fn dispatch(&self, message: ControlMessage) -> Result<Option<ControlReply>> {
        match message {
            ControlMessage::ForceActivate => {
                info!("Forced activation requested");
                if let Err(e) = self.lifecycle.force_activate().await {
                    warn!("Forced activation failed: {}", e);
                }
                Ok(None)
            }
            ControlMessage::VersionQuery => Ok(Some(ControlReply::Version {
                version: self.lifecycle.version().to_string(),
            })),
            ControlMessage::EndpointSweep => Ok(Some(ControlReply::Sweep {
                domains: self.sweep().await,
            })),
            ControlMessage::Purge => Ok(Some(self.purge().await)),
        }
    }

    /// Probes every candidate concurrently, ignoring cached verdicts.
    ///
    /// Results come back in priority order; one endpoint failing only marks
    /// that endpoint unavailable.
    pub async fn sweep(&self) -> Vec<DomainStatus> {
        let probes = self.candidates.iter().map(|candidate| async move {
            DomainStatus {
                domain: candidate.origin.to_string(),
                available: self.health.probe_now(&candidate.origin).await,
            }
        });
        futures::future::join_all(probes).await
    }

    /// Clears the health cache and deletes every cache namespace.
    pub async fn purge(&self) -> ControlReply {
        self.health.clear().await;
        let report = self.lifecycle.purge_all().await;
        match report.failure_summary() {
            None => ControlReply::purged(),
            Some(summary) => ControlReply::purge_failed(summary),
        }
    }
}

/// Sending side of the control channel.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlEnvelope>,
}

impl ControlHandle {
    /// Sends `message` and waits for its reply. Messages that carry no
    /// reply resolve to `None` once queued.
    pub async fn request(&self, message: ControlMessage) -> Result<Option<ControlReply>> {
        if !message.expects_reply() {
            self.send(message).await?;
            return Ok(None);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ControlEnvelope {
                message,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| DetourError::ControlChannelClosed)?;

        reply_rx
            .await
            .map(Some)
            .map_err(|_| DetourError::ControlChannelClosed)
    }

    /// Fire-and-forget send.
    pub async fn send(&self, message: ControlMessage) -> Result<()> {
        self.tx
            .send(ControlEnvelope {
                message,
                reply: None,
            })
            .await
            .map_err(|_| DetourError::ControlChannelClosed)
    }
}
