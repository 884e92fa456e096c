//! HTTP surface of `docs_deploy serve`: the webhook listener plus run status.

pub mod runs;
pub mod stream;
pub mod webhook;

use axum::{Router, routing};
use tracing::info;

use crate::SharedState;
use crate::error::Result;

pub use runs::{get_run, root, status};
pub use stream::stream_runs;
pub use webhook::{handle_webhook, verify_github_signature};

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/webhook", routing::post(handle_webhook))
        .route("/status", routing::get(status))
        .route("/runs/{id}", routing::get(get_run))
        .route("/stream/runs", routing::get(stream_runs))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: SharedState) -> Result<()> {
    let bind_address = state.server.bind_address.clone();
    if !state.server.has_valid_secret() {
        tracing::warn!("No webhook secret configured; signatures will not be checked");
    }
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on {}", bind_address);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
