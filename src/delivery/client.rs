use crate::collector::batch::BatchDocument;
use crate::config::types::CollectorConfig;
use crate::delivery::{Acknowledgement, DeliveryError, Receipt, Transport};
use async_trait::async_trait;
use std::time::Duration;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// POSTs batch documents as JSON to the configured endpoint
#[derive(Debug)]
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &CollectorConfig) -> Result<Self, DeliveryError> {
        Self::with_timeout(&config.endpoint, config.timeout)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, document: &BatchDocument) -> Result<Acknowledgement, DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(IDEMPOTENCY_HEADER, document.batch_id.to_string())
            .json(document)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(self.timeout)
                } else {
                    DeliveryError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        // Endpoints that do not speak the receipt format still acknowledge
        let body = response.bytes().await.unwrap_or_default();
        let receipt = serde_json::from_slice::<Receipt>(&body).ok();

        Ok(Acknowledgement {
            status: status.as_u16(),
            receipt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_keeps_endpoint() {
        let config = CollectorConfig {
            endpoint: "http://localhost:7200/observations".to_string(),
            collector_id: None,
            timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_interval: Duration::from_millis(500),
            lock_wait: Duration::from_secs(5),
            max_clock_skew: Duration::from_secs(600),
            poll_interval: None,
        };

        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.endpoint(), "http://localhost:7200/observations");
        assert_eq!(transport.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient_failure() {
        // Port 9 (discard) on localhost is closed in test environments
        let transport =
            HttpTransport::with_timeout("http://127.0.0.1:9/observations", Duration::from_secs(2)).unwrap();
        let batch = crate::collector::batch::Batch::new(
            "gizmo",
            vec![crate::collector::batch::Reading::new("28-01", 1.0, chrono::Utc::now())],
            chrono::Utc::now(),
        );
        let err = transport.deliver(&BatchDocument::from(&batch)).await.unwrap_err();
        assert!(err.is_transient());
    }
}
