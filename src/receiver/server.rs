use crate::receiver::api::{health_check, post_observations, ReceiverState};
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(state: Arc<ReceiverState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/observations", post(post_observations))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: Arc<ReceiverState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    info!(addr = %listener.local_addr()?, "Receiver listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Bind `listen_addr` and serve until `shutdown` resolves
pub async fn start_server(
    listen_addr: SocketAddr,
    state: Arc<ReceiverState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(listen_addr).await?;
    serve(listener, state, shutdown).await
}
