use crate::collector::batch::BatchDocument;
use crate::delivery::client::IDEMPOTENCY_HEADER;
use crate::delivery::Receipt;
use crate::storage::archive::Archive;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Shared state for the receiver API
pub struct ReceiverState {
    pub archive: Mutex<Archive>,
}

impl ReceiverState {
    pub fn new(archive: Archive) -> Arc<Self> {
        Arc::new(Self {
            archive: Mutex::new(archive),
        })
    }
}

/// POST /observations
///
/// Stores the batch unless its ID is already archived. A repeat delivery is
/// answered with `stored: false` and writes nothing.
pub async fn post_observations(
    State(state): State<Arc<ReceiverState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Receipt>, ApiError> {
    let document: BatchDocument = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Unprocessable(format!("invalid batch document: {}", e)))?;

    if let Some(key) = headers.get(IDEMPOTENCY_HEADER) {
        let matches = key
            .to_str()
            .map(|k| k.eq_ignore_ascii_case(&document.batch_id.to_string()))
            .unwrap_or(false);
        if !matches {
            return Err(ApiError::Unprocessable(format!(
                "{} header does not match batch_id {}",
                IDEMPOTENCY_HEADER, document.batch_id
            )));
        }
    }

    let batch = document.into_sent_batch();
    batch
        .validate()
        .map_err(|e| ApiError::Unprocessable(e.to_string()))?;

    let batch_id = batch.batch_id;
    let stored = {
        let mut archive = state.archive.lock().await;
        archive.append(&batch).map_err(|e| {
            error!(batch_id = %batch_id, error = %e, "Failed to archive batch");
            ApiError::InternalError(e.to_string())
        })?
    };

    info!(
        batch_id = %batch_id,
        collector_id = %batch.collector_id,
        readings = batch.readings.len(),
        stored,
        "Observations received"
    );

    Ok(Json(Receipt { batch_id, stored }))
}

/// GET /health
pub async fn health_check() -> &'static str {
    "ok"
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    Unprocessable(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unprocessable(msg) => {
                warn!(reason = %msg, "Rejecting observations");
                (StatusCode::UNPROCESSABLE_ENTITY, msg)
            }
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
