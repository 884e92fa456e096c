//! Webhook handler for GitHub push and workflow_dispatch events

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::error::DeployError;
use crate::event::{RunContext, TriggerEvent};
use crate::pipeline::{Pipeline, RunOptions};
use crate::run::{RunEvent, RunRecord};

type HmacSha256 = Hmac<Sha256>;

const PING_EVENT: &str = "ping";

/// Check a `X-Hub-Signature-256` header (`sha256=<hex>`) against `payload`.
pub fn verify_github_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let Some(signature_hex) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(signature) = hex::decode(signature_hex) else {
        error!("Signature verification failed: header is not hex");
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn broadcast(state: &SharedState, record: &RunRecord) {
    // No subscribers is fine.
    let _ = state.run_events.send(RunEvent::from_record(record));
}

/// POST /webhook
///
/// Fetches the source remote and resolves the event right away so a bad
/// trigger is rejected with 422 before any run exists. Accepted events are
/// queued and run in the background, one at a time, each on a checkout of
/// its own revision.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.server.has_valid_secret() {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok());
        let secret = state.server.webhook_secret.as_deref().unwrap_or_default();
        match signature {
            None => {
                error!("Webhook secret configured, but no signature header supplied");
                return error_response(StatusCode::UNAUTHORIZED, "missing signature");
            }
            Some(sig) if !verify_github_signature(secret, &body, sig) => {
                error!("Signature verification failed");
                return error_response(StatusCode::UNAUTHORIZED, "invalid signature");
            }
            Some(_) => {}
        }
    }

    let Some(event_name) = headers.get("X-GitHub-Event").and_then(|v| v.to_str().ok()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing X-GitHub-Event header");
    };
    if event_name == PING_EVENT {
        info!("Received ping event");
        return StatusCode::NO_CONTENT.into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            info!("Could not parse JSON body: {:?}", e);
            return error_response(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}"));
        }
    };

    let event = match TriggerEvent::from_webhook(event_name, &payload) {
        Ok(event) => event,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let ctx = RunContext::from_webhook(&payload);
    debug!("Webhook {} -> {:?}", event_name, event);

    let pipeline = Pipeline::new(
        state.config.clone(),
        RunOptions {
            skip_build: false,
            dry_run: state.dry_run,
        },
    );
    if let Err(e) = pipeline.refresh_source().await {
        error!("Failed to refresh source checkout: {}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    let plan = match pipeline.plan(event).await {
        Ok(plan) => plan,
        Err(DeployError::Resolve(e)) => {
            warn!("Rejecting webhook: {}", e);
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string());
        }
        Err(e) => {
            error!("Failed to plan deployment: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let commit_sha = (!ctx.commit_sha.is_empty()).then(|| ctx.commit_sha.clone());
    let record = RunRecord::new(plan.event.describe(), plan.prefixes.as_slice().to_vec(), commit_sha);
    let run_id = record.id.clone();
    broadcast(&state, &record);
    state.runs.lock().await.insert(record);
    info!("Queued run {} for {}", run_id, plan.event.describe());

    let shared_state = state.clone();
    let id = run_id.clone();
    tokio::spawn(async move {
        // Only one deployment runs at a time.
        let _guard = shared_state.execution_lock.lock().await;

        if let Some(record) = shared_state.runs.lock().await.update(&id, RunRecord::mark_running) {
            broadcast(&shared_state, &record);
        }
        info!("Run {} started", id);

        let result = match pipeline.checkout(&plan, &ctx).await {
            Ok(()) => pipeline.execute(plan, &ctx).await,
            Err(e) => Err(e),
        };
        let updated = shared_state.runs.lock().await.update(&id, |record| match result {
            Ok(report) => record.mark_finished(report),
            Err(e) => {
                error!("Run {} failed: {}", id, e);
                record.mark_failed(e.to_string());
            }
        });
        if let Some(record) = updated {
            info!("Run {} finished: {}", id, record.status.as_str());
            broadcast(&shared_state, &record);
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "run_id": run_id }))).into_response()
}
