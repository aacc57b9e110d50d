//! Webhook handler for GitLab deployment events

use axum::{
    Json,
    body::to_bytes,
    extract::{Request, State as AxumState},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error, info};

use crate::SharedState;
use crate::job::DeployRun;
use crate::utils::{request_host, verify_gitlab_token};
use crate::webhook::{DeploymentEvent, DeploymentStatus, FetchTarget};

/// Largest request body accepted, GitLab deployment events are a few KiB
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Handles the GitLab webhook request.
///
/// Method and token are checked before the body is read. A successful
/// deployment queues a pipeline run and the handler answers right away;
/// the run's outcome only shows up in the logs.
pub async fn handle_gitlab(AxumState(state): AxumState<SharedState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let host = request_host(&parts.headers).to_string();

    if parts.method != Method::POST {
        error!("{} ERROR: Invalid request method {}", host, parts.method);
        return (StatusCode::METHOD_NOT_ALLOWED, "Invalid request method").into_response();
    }

    if !verify_gitlab_token(&state.config.secret_token, &parts.headers) {
        error!("{} ERROR: Invalid secret GitLab token", host);
        return (StatusCode::UNAUTHORIZED, "Invalid secret GitLab token").into_response();
    }

    let event = match to_bytes(body, MAX_PAYLOAD_BYTES)
        .await
        .map_err(|e| e.to_string())
        .and_then(|bytes| {
            serde_json::from_slice::<DeploymentEvent>(&bytes).map_err(|e| e.to_string())
        }) {
        Ok(event) => event,
        Err(e) => {
            error!("{} ERROR: Unable to parse JSON: {}", host, e);
            return (StatusCode::BAD_REQUEST, "Unable to parse the JSON").into_response();
        }
    };
    info!("{} Incoming {} GitLab request", host, parts.method);

    if event.is_deployment() {
        dispatch_deployment(&state, &host, &event);
    } else {
        debug!("{} Ignoring '{}' event", host, event.object_kind);
    }

    (StatusCode::OK, Json(json!({"status": "success"}))).into_response()
}

fn dispatch_deployment(state: &SharedState, host: &str, event: &DeploymentEvent) {
    let target = FetchTarget::resolve(event, &state.config);
    let project_id = target.project_id;

    match event.status {
        DeploymentStatus::Running => {
            info!("{} Deployment job is running, project ID: {}", host, project_id)
        }
        DeploymentStatus::Failed => {
            info!("{} Deployment job failed, project ID: {}", host, project_id)
        }
        DeploymentStatus::Canceled => {
            info!("{} Deployment job canceled, project ID: {}", host, project_id)
        }
        DeploymentStatus::Success => {
            let run = DeployRun::from_event(event, target);
            info!(
                run = %run.id,
                "{} Deployment job successful, {}, triggered by: {}. Queued for download",
                host,
                run.target,
                run.triggered_by
            );
            if let Err(e) = state.queue.submit(run) {
                error!("{} Could not queue deployment: {}", host, e);
            }
        }
        DeploymentStatus::Other => {
            debug!("{} Ignoring deployment status, project ID: {}", host, project_id)
        }
    }
}
