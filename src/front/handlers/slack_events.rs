use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::{
    app_error::AppError,
    blob_store::BlobStore,
    commands::usage,
    github_client::GithubClient,
    installation_store::InstallQuery,
    request_verifier::RequestVerifier,
    slack_client::SlackClient,
    state::AppState,
};

// https://api.slack.com/apis/events-api#callback-field
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        team_id: String,
        event: Event,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event {
    AppHomeOpened {
        user: String,
        #[serde(default)]
        tab: Option<String>,
    },
    AppUninstalled,
    TokensRevoked {
        #[serde(default)]
        tokens: RevokedTokens,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct RevokedTokens {
    #[serde(default)]
    bot: Vec<String>,
}

pub fn home_view(command: &str) -> Value {
    json!({
        "type": "home",
        "blocks": [
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": "*Hello, GitHub!* :tada:" },
            },
            { "type": "divider" },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": usage(command) },
            },
        ],
    })
}

#[instrument(skip_all)]
pub async fn slack_events<B, GH, SL, V>(
    headers: HeaderMap,
    State(state): State<Arc<AppState<B, GH, SL>>>,
    body: String,
) -> Result<Response, AppError>
where
    B: BlobStore,
    GH: GithubClient,
    SL: SlackClient,
    V: RequestVerifier,
{
    if let Err(e) = V::verify_slack(
        &headers,
        &body,
        &state.slack_app.slack_signing_secret,
        state.config.signature_max_skew.into(),
    ) {
        warn!("Request verification failed: {e}");
        return Err(AppError::AuthorizationError);
    }

    let envelope = serde_json::from_str::<Envelope>(&body)
        .map_err(|e| AppError::BadRequest(format!("failed to parse event payload: {e}")))?;
    let (team_id, event) = match envelope {
        Envelope::UrlVerification { challenge } => {
            return Ok(Json(json!({ "challenge": challenge })).into_response());
        }
        Envelope::EventCallback { team_id, event } => (team_id, event),
        Envelope::Other => {
            info!("unsupported envelope type, skipping");
            return Ok(StatusCode::OK.into_response());
        }
    };

    let query = InstallQuery::team(&team_id);
    match event {
        Event::AppHomeOpened { user, tab } => {
            if tab.as_deref().is_some_and(|tab| tab != "home") {
                return Ok(StatusCode::OK.into_response());
            }
            let Some(bot) = state
                .installations
                .fetch_installation(&query)
                .await?
                .and_then(|i| i.bot)
            else {
                warn!(team_id, "no installation found for team");
                return Ok(StatusCode::OK.into_response());
            };
            let view = home_view(&state.slack_app.slack_command);
            state.slack_client.publish_view(&bot.token, &user, &view).await?;
            info!(team_id, user, "home view published");
        }
        Event::AppUninstalled => {
            state.installations.delete_installation(&query).await?;
            info!(team_id, "app uninstalled");
        }
        Event::TokensRevoked { tokens } if !tokens.bot.is_empty() => {
            state.installations.delete_installation(&query).await?;
            info!(team_id, "bot token revoked");
        }
        // Only user tokens were revoked, the bot token still works.
        Event::TokensRevoked { .. } => info!(team_id, "user tokens revoked, keeping installation"),
        Event::Other => info!("unsupported event type, skipping"),
    }
    Ok(StatusCode::OK.into_response())
}
