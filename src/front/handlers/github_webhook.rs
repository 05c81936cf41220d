use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, StatusCode};
use serde_json::{from_str, json};
use tokio::time::timeout;
use tracing::{Instrument as _, Span, field::Empty, info, instrument, warn};

use crate::{
    app_error::AppError,
    blob_store::BlobStore,
    front::{
        github_events::{IssuesEvent, WebhookCommonFields},
        handlers::get_header_str,
    },
    github_client::GithubClient,
    notifier::{IssueOpened, notify_issue_opened},
    request_verifier::RequestVerifier,
    slack_client::SlackClient,
    state::AppState,
};

const SUPPORTED_EVENTS: &[(&str, &[&str])] = &[("ping", &[]), ("issues", &["opened"])];

#[instrument(
    skip_all,
    fields(
        delivery_id = Empty,
        event_name = Empty,
        action = Empty,
        owner = Empty,
        repo = Empty
    )
)]
pub async fn github_webhook<B, GH, SL, V>(
    headers: HeaderMap,
    State(state): State<Arc<AppState<B, GH, SL>>>,
    body: String,
) -> Result<Response, AppError>
where
    B: BlobStore + 'static,
    GH: GithubClient + 'static,
    SL: SlackClient + 'static,
    V: RequestVerifier,
{
    if let Err(e) = V::verify_github(&headers, &body, &state.github_app.webhook_secret) {
        warn!("Request verification failed: {e}");
        return Err(AppError::AuthorizationError);
    }

    let delivery_id = get_header_str(&headers, "x-github-delivery")
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    Span::current().record("delivery_id", delivery_id);
    let event_name = get_header_str(&headers, "x-github-event")
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    Span::current().record("event_name", event_name);
    let supported_actions = match SUPPORTED_EVENTS
        .iter()
        .find(|(name, _)| name == &event_name)
    {
        None => {
            info!("unsupported event type");
            return Ok((
                StatusCode::OK,
                format!("Unsupported event type, skipping: {event_name}"),
            )
                .into_response());
        }
        Some(ev) => ev.1,
    };
    if event_name == "ping" {
        return Ok((StatusCode::OK, "pong").into_response());
    }

    let common = from_str::<WebhookCommonFields>(&body).map_err(|e| {
        AppError::BadRequest(format!("failed to parse payload: event={event_name}: {e}"))
    })?;
    Span::current().record("action", &common.action);
    Span::current().record("owner", &common.repository.owner.login);
    Span::current().record("repo", &common.repository.name);
    if !supported_actions.contains(&common.action.as_ref()) {
        info!("action not supported");
        return Ok((
            StatusCode::OK,
            format!("Unsupported event action, skipping: {}", common.action),
        )
            .into_response());
    }

    let event = from_str::<IssuesEvent>(&body).map_err(|e| {
        AppError::BadRequest(format!("failed to parse payload: event={event_name}: {e}"))
    })?;
    let event = IssueOpened::from(event);

    // The task is detached on timeout, not cancelled.
    let deadline = state.config.response_timeout.into();
    let task = tokio::spawn(
        async move { notify_issue_opened(&state, &event).await }.instrument(Span::current()),
    );
    match timeout(deadline, task).await {
        Ok(Ok(Ok(report))) => {
            info!(
                delivered = report.delivered,
                skipped = report.skipped,
                failed = report.failed,
                "issue event processed"
            );
            Ok((StatusCode::OK, "OK").into_response())
        }
        Ok(Ok(Err(e))) => Err(e.into()),
        Ok(Err(e)) => Err(anyhow!("webhook processing task failed: {e}").into()),
        Err(_) => {
            info!(timeout = ?deadline, "still processing, answering early");
            Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true }))).into_response())
        }
    }
}

pub async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
}
