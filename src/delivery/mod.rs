pub mod client;

pub use client::HttpTransport;

use crate::collector::batch::BatchDocument;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("endpoint returned error status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<DeliveryError>,
    },
}

impl DeliveryError {
    /// Whether another attempt could plausibly succeed. Client errors other
    /// than 408/429 mean the endpoint refuses this document as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Http(_) | DeliveryError::Timeout(_) => true,
            DeliveryError::Rejected { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            DeliveryError::Exhausted { last, .. } => last.is_transient(),
        }
    }

    /// HTTP status the endpoint answered with, if it answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Rejected { status, .. } => Some(*status),
            DeliveryError::Exhausted { last, .. } => last.status(),
            DeliveryError::Http(_) | DeliveryError::Timeout(_) => None,
        }
    }
}

/// Body an endpoint may answer with; anything else in a 2xx response
/// still counts as an acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub batch_id: Uuid,
    /// `false` when the endpoint had already stored this batch
    pub stored: bool,
}

#[derive(Debug, Clone)]
pub struct Acknowledgement {
    pub status: u16,
    pub receipt: Option<Receipt>,
}

impl Acknowledgement {
    pub fn was_duplicate(&self) -> bool {
        matches!(&self.receipt, Some(r) if !r.stored)
    }
}

/// Carries one batch document to the remote endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, document: &BatchDocument) -> Result<Acknowledgement, DeliveryError>;
}

/// Immediate retries within one collector cycle
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_interval: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_interval: Duration::ZERO,
        }
    }
}

/// Deliver with exponential backoff, at most `1 + max_retries` attempts.
/// Permanent rejections are not retried.
pub async fn deliver_with_retry(
    transport: &dyn Transport,
    document: &BatchDocument,
    policy: RetryPolicy,
) -> Result<Acknowledgement, DeliveryError> {
    let mut attempts = 0;
    let mut backoff = policy.retry_interval;

    loop {
        match transport.deliver(document).await {
            Ok(ack) => return Ok(ack),
            Err(e) => {
                attempts += 1;
                if !e.is_transient() || attempts > policy.max_retries {
                    return Err(DeliveryError::Exhausted {
                        attempts,
                        last: Box::new(e),
                    });
                }

                tracing::warn!(
                    batch_id = %document.batch_id,
                    attempt = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Delivery failed, retrying"
                );

                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, Duration::from_secs(10));
            }
        }
    }
}
