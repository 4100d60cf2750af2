// Relays inbound client frames to the downstream processor.
//
// Each frame becomes one POST with no retry. The connection's read loop
// only spawns the call; outcomes end up in logs and metrics and never
// reach the client.

use std::{sync::Arc, time::Duration};

use reqwest::StatusCode;
use switchboard_common::protocol::internal::ForwardEnvelope;
use thiserror::Error;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

use crate::metrics::GatewayMetrics;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to encode forward envelope: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("processor request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("processor responded with {status}")]
    Rejected { status: StatusCode, body: String },
}

impl ForwardError {
    fn outcome_label(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "rejected",
            Self::Encode(_) | Self::Transport(_) => "failed",
        }
    }
}

/// What the processor answered for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardReceipt {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    endpoint: Arc<str>,
    metrics: Arc<GatewayMetrics>,
}

impl Forwarder {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint: Arc::from(endpoint.into()), metrics })
    }

    /// Fire-and-forget: spawns the downstream call and returns immediately.
    /// The handle is only useful to tests; callers are free to drop it.
    pub fn forward(&self, session_id: &str, message: Vec<u8>) -> JoinHandle<()> {
        let forwarder = self.clone();
        let session_id = session_id.to_owned();

        tokio::spawn(async move {
            let started_at = Instant::now();
            match forwarder.deliver(&session_id, &message).await {
                Ok(receipt) => {
                    forwarder.metrics.record_forward("delivered");
                    info!(
                        session_id = %session_id,
                        status = receipt.status.as_u16(),
                        body = %receipt.body,
                        latency_ms = started_at.elapsed().as_millis() as u64,
                        "processor accepted forwarded message"
                    );
                }
                Err(error) => {
                    forwarder.metrics.record_forward(error.outcome_label());
                    warn!(
                        session_id = %session_id,
                        error = %error,
                        latency_ms = started_at.elapsed().as_millis() as u64,
                        "failed to forward message to processor"
                    );
                }
            }
        })
    }

    /// Performs one downstream call and reports how it went.
    pub async fn deliver(
        &self,
        session_id: &str,
        message: &[u8],
    ) -> Result<ForwardReceipt, ForwardError> {
        let envelope = ForwardEnvelope::from_frame(session_id, message)?;
        debug!(session_id = %session_id, bytes = message.len(), "forwarding message to processor");

        let response = self.client.post(self.endpoint.as_ref()).json(&envelope).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            Ok(ForwardReceipt { status, body })
        } else {
            Err(ForwardError::Rejected { status, body })
        }
    }
}
