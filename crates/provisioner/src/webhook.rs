//! Inbound pull request webhooks: authenticate, validate, resolve, then enqueue.
//!
//! Nothing here talks to the provisioning API; accepted events only become job rows.

use std::future::Future;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tracing::{info, warn};

use crate::db::{BranchState, DbClient, NewWebhookDelivery, ProjectRecord};
use crate::queue::unix_now;
use crate::request_logging::log_webhook_request;

pub mod dispatcher;
pub mod error;
pub mod payload;
pub mod resolver;
pub mod signature;

use dispatcher::dispatch;
use error::WebhookError;
use payload::{parse_pull_request_event, PullRequestEvent};
use resolver::{resolve_branch, resolve_project};
use signature::verify_signature;

pub const PULL_REQUEST_WEBHOOK_PATH: &str = "/api/webhooks/github/pullrequest";

const SIGNATURE_HEADER: &str = "X-Hub-Signature";
const DELIVERY_HEADER: &str = "X-GitHub-Delivery";
const EVENT_HEADER: &str = "X-GitHub-Event";
const DEFAULT_EVENT_TYPE: &str = "pull_request";

#[derive(Debug, Clone)]
pub struct WebhookState {
    pub db: DbClient,
}

#[must_use]
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route(PULL_REQUEST_WEBHOOK_PATH, post(pull_request_webhook))
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn(log_webhook_request))
        .with_state(state)
}

/// Serves the webhook endpoint on `bind_address` until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(
    state: WebhookState,
    bind_address: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!(%bind_address, path = PULL_REQUEST_WEBHOOK_PATH, "webhook endpoint listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn pull_request_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    handle_pull_request(&state, &headers, &body)
        .await
        .map(|message| (StatusCode::OK, message))
        .inspect_err(|error| match error {
            WebhookError::Internal(cause) => {
                tracing::error!(error = %cause, "webhook processing failed");
            }
            rejection => warn!(reason = %rejection, "webhook rejected"),
        })
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

async fn handle_pull_request(
    state: &WebhookState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<&'static str, WebhookError> {
    let event = parse_pull_request_event(body)?;

    let project = resolve_project(&state.db, &event.repository)
        .await?
        .ok_or(WebhookError::Unauthenticated)?;

    if !verify_signature(
        header_value(headers, SIGNATURE_HEADER),
        &project.webhook_secret,
        body,
    ) {
        return Err(WebhookError::Unauthenticated);
    }

    let delivery_id = header_value(headers, DELIVERY_HEADER);
    if let Some(delivery_id) = delivery_id {
        let first_delivery = state
            .db
            .record_webhook_delivery(&NewWebhookDelivery {
                delivery_id: delivery_id.to_string(),
                event_type: header_value(headers, EVENT_HEADER)
                    .unwrap_or(DEFAULT_EVENT_TYPE)
                    .to_string(),
                project_id: project.id.clone(),
                pull_request_number: event.number,
                action: event.action.as_str().to_string(),
            })
            .await?;

        if !first_delivery {
            info!(%delivery_id, repository = %event.repository, "duplicate delivery ignored");
            return Ok("Duplicate delivery ignored");
        }
    }

    let outcome = apply_event(&state.db, &project, &event).await;

    if outcome.is_err() {
        if let Some(delivery_id) = delivery_id {
            if let Err(error) = state.db.forget_webhook_delivery(delivery_id).await {
                warn!(%delivery_id, %error, "failed to release delivery id");
            }
        }
    }

    outcome
}

async fn apply_event(
    db: &DbClient,
    project: &ProjectRecord,
    event: &PullRequestEvent,
) -> Result<&'static str, WebhookError> {
    let branch = resolve_branch(db, project, event).await?;
    let current = branch
        .as_ref()
        .map_or(BranchState::Unprovisioned, |branch| branch.state);

    let transition = dispatch(current, &event.action)?;
    if transition.is_noop() {
        info!(
            repository = %event.repository,
            number = event.number,
            action = event.action.as_str(),
            "no action taken"
        );
        return Ok("No action taken");
    }

    let branch = branch.ok_or(WebhookError::UnknownBranch)?;
    db.transition_branch(&branch.id, transition.next_state, transition.chain, unix_now())
        .await?;

    info!(
        repository = %event.repository,
        number = event.number,
        action = event.action.as_str(),
        branch_id = %branch.id,
        jobs = transition.chain.len(),
        "pull request event accepted"
    );

    Ok("Accepted")
}

#[cfg(test)]
mod tests;
