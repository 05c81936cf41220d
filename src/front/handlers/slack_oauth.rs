use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::Utc;
use http::{StatusCode, header};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use url::Url;

use crate::{
    app_error::AppError,
    blob_store::BlobStore,
    github_client::GithubClient,
    request_verifier::{issue_oauth_state, verify_oauth_state},
    slack_client::{SlackAppConfig, SlackClient},
    state::AppState,
};

const AUTHORIZE_URL: &str = "https://slack.com/oauth/v2/authorize";

#[derive(Debug, Deserialize)]
pub struct OAuthRedirectQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub fn authorize_url(app: &SlackAppConfig, state: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(AUTHORIZE_URL)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &app.slack_client_id)
            .append_pair("scope", &app.slack_scopes)
            .append_pair("user_scope", "")
            .append_pair("state", state);
        if let Some(redirect) = &app.slack_redirect_url {
            query.append_pair("redirect_uri", redirect);
        }
    }
    Ok(url)
}

pub async fn slack_install<B, GH, SL>(
    State(state): State<Arc<AppState<B, GH, SL>>>,
) -> Result<impl IntoResponse, AppError>
where
    B: BlobStore,
    GH: GithubClient,
    SL: SlackClient,
{
    let oauth_state =
        issue_oauth_state(&state.slack_app.slack_client_secret, Utc::now().timestamp())?;
    let url = authorize_url(&state.slack_app, &oauth_state).map_err(anyhow::Error::from)?;
    Ok((StatusCode::FOUND, [(header::LOCATION, url.to_string())]))
}

#[instrument(skip_all)]
pub async fn slack_oauth_redirect<B, GH, SL>(
    State(state): State<Arc<AppState<B, GH, SL>>>,
    Query(query): Query<OAuthRedirectQuery>,
) -> Result<impl IntoResponse, AppError>
where
    B: BlobStore,
    GH: GithubClient,
    SL: SlackClient,
{
    if let Some(error) = query.error {
        warn!(error, "installation was not approved");
        return Err(AppError::BadRequest(format!("installation failed: {error}")));
    }
    let Some(code) = query.code else {
        return Err(AppError::BadRequest("missing code".to_owned()));
    };
    let oauth_state = query.state.unwrap_or_default();
    if let Err(e) = verify_oauth_state(
        &oauth_state,
        &state.slack_app.slack_client_secret,
        Utc::now().timestamp(),
        state.config.oauth_state_max_age.into(),
    ) {
        warn!("oauth state verification failed: {e}");
        return Err(AppError::BadRequest("invalid state".to_owned()));
    }

    let installation = state
        .slack_client
        .oauth_access(&code, state.slack_app.slack_redirect_url.clone())
        .await?;
    state.installations.store_installation(&installation).await?;
    let team = installation.team.map(|t| t.name.unwrap_or(t.id)).unwrap_or_default();
    info!(team, "app installed");
    Ok((
        StatusCode::OK,
        format!("Hello, GitHub! is now installed in {team}. You can close this window."),
    ))
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, bail};
    use axum::{Router, routing::get};
    use axum_test::TestServer;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        github_client::MockGithubClient,
        installation_store::{InstallQuery, test::installation},
        slack_client::MockSlackClient,
        state::test::{TestState, state},
    };

    const MAX_AGE: std::time::Duration = std::time::Duration::from_secs(600);

    fn valid_state() -> Result<String> {
        issue_oauth_state("client-secret", Utc::now().timestamp())
    }

    fn server(state: Arc<TestState>) -> Result<TestServer> {
        let app = Router::new()
            .route("/api/slack/install", get(slack_install))
            .route("/api/slack/oauth_redirect", get(slack_oauth_redirect))
            .with_state(state);
        Ok(TestServer::new(app)?)
    }

    #[test]
    fn authorize_url_has_client_and_scopes() -> Result<()> {
        let app = SlackAppConfig {
            slack_redirect_url: Some("https://example.com/api/slack/oauth_redirect".to_owned()),
            ..Default::default()
        };
        let url = authorize_url(&app, "1000.abc")?;
        assert_eq!(
            url.as_str(),
            "https://slack.com/oauth/v2/authorize?client_id=client-id&scope=chat%3Awrite%2Ccommands\
             &user_scope=&state=1000.abc\
             &redirect_uri=https%3A%2F%2Fexample.com%2Fapi%2Fslack%2Foauth_redirect"
        );
        Ok(())
    }

    #[tokio::test]
    async fn install_redirects_to_slack() -> Result<()> {
        let server = server(Arc::new(state(MockGithubClient::new(), MockSlackClient::new())))?;
        let res = server.get("/api/slack/install").await;
        res.assert_status(StatusCode::FOUND);
        let location = Url::parse(res.header("location").to_str()?)?;
        assert!(location.as_str().starts_with(AUTHORIZE_URL));
        let (_, issued) = location
            .query_pairs()
            .find(|(k, _)| k == "state")
            .expect("state parameter not found");
        verify_oauth_state(&issued, "client-secret", Utc::now().timestamp(), MAX_AGE)?;
        Ok(())
    }

    #[tokio::test]
    async fn oauth_redirect_stores_installation() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack
            .expect_oauth_access()
            .withf(|code, redirect| code == "the-code" && redirect.is_none())
            .once()
            .returning(|_, _| Ok(installation("T1", "xoxb-t1")));
        let state = Arc::new(state(MockGithubClient::new(), slack));
        let server = server(state.clone())?;

        let res = server
            .get("/api/slack/oauth_redirect")
            .add_query_param("code", "the-code")
            .add_query_param("state", valid_state()?)
            .await;
        res.assert_status_ok();
        let stored = state
            .installations
            .fetch_installation(&InstallQuery::team("T1"))
            .await?;
        assert_eq!(stored, Some(installation("T1", "xoxb-t1")));
        Ok(())
    }

    #[tokio::test]
    async fn oauth_redirect_without_code() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack.expect_oauth_access().never();
        let server = server(Arc::new(state(MockGithubClient::new(), slack)))?;
        server
            .get("/api/slack/oauth_redirect")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        server
            .get("/api/slack/oauth_redirect?error=access_denied")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn oauth_exchange_failure() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack
            .expect_oauth_access()
            .returning(|_, _| bail!("slack oauth.v2.access failed: invalid_code"));
        let server = server(Arc::new(state(MockGithubClient::new(), slack)))?;
        server
            .get("/api/slack/oauth_redirect")
            .add_query_param("code", "stale")
            .add_query_param("state", valid_state()?)
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        Ok(())
    }

    #[tokio::test]
    async fn oauth_redirect_rejects_bad_state() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack.expect_oauth_access().never();
        let server = server(Arc::new(state(MockGithubClient::new(), slack)))?;
        server
            .get("/api/slack/oauth_redirect?code=the-code")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        let forged = issue_oauth_state("attacker-secret", Utc::now().timestamp())?;
        server
            .get("/api/slack/oauth_redirect")
            .add_query_param("code", "the-code")
            .add_query_param("state", forged)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        let expired = issue_oauth_state("client-secret", Utc::now().timestamp() - 3600)?;
        server
            .get("/api/slack/oauth_redirect")
            .add_query_param("code", "the-code")
            .add_query_param("state", expired)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        Ok(())
    }
}
