//! HTTP surface of the engine.

pub mod error;
pub mod handlers;
pub mod receiver;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::Result;
pub use error::{ApiError, ApiResult};
pub use receiver::Inbox;

/// Engine routes plus the built-in webhook receiver.
pub fn router(engine: Arc<Engine>, inbox: Arc<Inbox>) -> Router {
    Router::new()
        .route("/register_callback", post(handlers::register_callback))
        .route("/unregister_callback", post(handlers::unregister_callback))
        .route(
            "/start_task_with_callbacks",
            post(handlers::start_task_with_callbacks),
        )
        .route("/validate", post(handlers::validate))
        .route("/task_result/{task_id}", get(handlers::task_result))
        .route(
            "/registered_callbacks/{task_id}",
            get(handlers::registered_callbacks),
        )
        .route("/health", get(handlers::health))
        .with_state(engine)
        .merge(receiver::router(inbox))
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` until Ctrl-C.
pub async fn serve(router: Router, bind: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        return;
    }
    info!("shutdown requested");
}
