pub mod api;
pub mod server;

pub use api::ReceiverState;
pub use server::{router, serve, start_server};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::batch::{Batch, BatchDocument, Reading};
    use crate::delivery::Receipt;
    use crate::storage::archive::Archive;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn document() -> BatchDocument {
        let at = Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap();
        let batch = Batch::new(
            "gizmo",
            vec![Reading::new("28-011912588b87", 16.187, at)],
            at,
        );
        BatchDocument::from(&batch)
    }

    fn post(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/observations")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_post_stores_once() {
        let dir = TempDir::new().unwrap();
        let state = ReceiverState::new(Archive::open(dir.path()).unwrap());
        let app = router(state.clone());
        let body = serde_json::to_vec(&document()).unwrap();

        for expected_stored in [true, false] {
            let response = app.clone().oneshot(post(body.clone())).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let receipt: Receipt = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(receipt.stored, expected_stored);
        }

        assert_eq!(state.archive.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_document_is_unprocessable() {
        let dir = TempDir::new().unwrap();
        let state = ReceiverState::new(Archive::open(dir.path()).unwrap());
        let app = router(state.clone());

        let response = app.clone().oneshot(post(b"{\"batch_id\":".to_vec())).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let mut empty = document();
        empty.readings.clear();
        let response = app
            .oneshot(post(serde_json::to_vec(&empty).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        assert!(state.archive.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_idempotency_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let app = router(ReceiverState::new(Archive::open(dir.path()).unwrap()));

        let mut request = post(serde_json::to_vec(&document()).unwrap());
        request.headers_mut().insert(
            "Idempotency-Key",
            "00000000-0000-0000-0000-000000000001".parse().unwrap(),
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let app = router(ReceiverState::new(Archive::open(dir.path()).unwrap()));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
