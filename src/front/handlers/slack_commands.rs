use std::sync::Arc;

use axum::extract::State;
use http::{HeaderMap, StatusCode};
use tracing::{error, info, instrument, warn};

use crate::{
    app_error::AppError,
    blob_store::BlobStore,
    commands::{SlashCommand, handle_command},
    github_client::GithubClient,
    request_verifier::RequestVerifier,
    slack_client::SlackClient,
    state::AppState,
};

const GENERIC_FAILURE: &str = "Something went wrong, please try again later.";

/// Acks with an empty 200, the user only ever sees replies sent through `response_url`.
#[instrument(skip_all)]
pub async fn slack_commands<B, GH, SL, V>(
    headers: HeaderMap,
    State(state): State<Arc<AppState<B, GH, SL>>>,
    body: String,
) -> Result<StatusCode, AppError>
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

    let command = SlashCommand::from_form(&body).map_err(|e| AppError::BadRequest(e.to_string()))?;
    if command.command != state.slack_app.slack_command {
        info!(command = %command.command, "not our command, ignoring");
        return Ok(StatusCode::OK);
    }

    if let Err(e) = handle_command(&state, &command).await {
        error!(error = ?e, "failed to handle slash command");
        if let Err(e) = state
            .slack_client
            .respond(&command.response_url, GENERIC_FAILURE)
            .await
        {
            warn!("failed to report command failure: {e}");
        }
    }
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, bail};
    use axum::{Router, routing::post};
    use axum_test::{TestResponse, TestServer};
    use http::{HeaderName, HeaderValue};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        github_client::MockGithubClient,
        request_verifier::test::{FailVerifier, NullVerifier},
        slack_client::MockSlackClient,
        state::test::{TestState, state},
        subscription_store::RepositoryScope,
    };

    const PATH: &str = "/api/slack/commands";

    fn form(text: &str) -> String {
        format!(
            "team_id=T1&channel_id=C1&user_id=U1&command=%2Fhello-github&text={text}\
            &api_app_id=A012345&response_url=https%3A%2F%2Fhooks.slack.com%2Fcommands%2FT1%2F1"
        )
    }

    async fn call(state: TestState, body: String) -> Result<TestResponse> {
        let app = Router::new()
            .route(PATH, post(slack_commands::<_, _, _, NullVerifier>))
            .with_state(Arc::new(state));
        let server = TestServer::new(app)?;
        Ok(server
            .post(PATH)
            .add_header(
                HeaderName::from_static("content-type"),
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .text(body)
            .await)
    }

    #[tokio::test]
    async fn verification_failure() -> Result<()> {
        let app = Router::new()
            .route(PATH, post(slack_commands::<_, _, _, FailVerifier>))
            .with_state(Arc::new(state(MockGithubClient::new(), MockSlackClient::new())));
        let server = TestServer::new(app)?;
        let res = server.post(PATH).text(form("help")).await;
        res.assert_status(StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_payload() -> Result<()> {
        let res = call(
            state(MockGithubClient::new(), MockSlackClient::new()),
            "text=help".to_owned(),
        )
        .await?;
        res.assert_status(StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn subscribe_acks_and_responds() -> Result<()> {
        let mut gh = MockGithubClient::new();
        gh.expect_find_repo_installation()
            .once()
            .returning(|_, _| Ok(Some(1)));
        let mut slack = MockSlackClient::new();
        slack
            .expect_respond()
            .withf(|url, text| {
                url == "https://hooks.slack.com/commands/T1/1"
                    && text == "subscribed to <https://github.com/monalisa/smile|monalisa/smile>"
            })
            .once()
            .returning(|_, _| Ok(()));
        let state = Arc::new(state(gh, slack));

        let app = Router::new()
            .route(PATH, post(slack_commands::<_, _, _, NullVerifier>))
            .with_state(state.clone());
        let server = TestServer::new(app)?;
        let res = server
            .post(PATH)
            .text(form("subscribe+monalisa%2Fsmile"))
            .await;
        res.assert_status_ok();
        res.assert_text("");

        let scope = RepositoryScope::new("monalisa", "smile", "A012345", 1)?;
        let keys = state
            .subscriptions
            .get_subscription_keys_for_repository(&scope)
            .await?;
        assert_eq!(keys, vec!["monalisa/smile/A012345/1/T1/C1"]);
        Ok(())
    }

    #[tokio::test]
    async fn failure_is_reported_to_user() -> Result<()> {
        let mut gh = MockGithubClient::new();
        gh.expect_find_repo_installation()
            .returning(|_, _| bail!("502 Bad Gateway"));
        let mut slack = MockSlackClient::new();
        slack
            .expect_respond()
            .withf(|_, text| text == GENERIC_FAILURE)
            .once()
            .returning(|_, _| Ok(()));
        let res = call(state(gh, slack), form("subscribe+monalisa%2Fsmile")).await?;
        res.assert_status_ok();
        Ok(())
    }

    #[tokio::test]
    async fn other_command_is_ignored() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack.expect_respond().never();
        let body = form("help").replace("%2Fhello-github", "%2Fsomething-else");
        let res = call(state(MockGithubClient::new(), slack), body).await?;
        res.assert_status_ok();
        Ok(())
    }
}
