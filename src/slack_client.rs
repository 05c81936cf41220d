use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use clap::Args;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use crate::{
    github_config::{ApiClientConfig, reqwest_client},
    installation_store::{Bot, Enterprise, Installation, Team},
};

#[derive(Debug, Args, Clone)]
pub struct SlackAppConfig {
    /// Slack App ID. Part of every subscription key.
    #[arg(env = "SLACK_APP_ID", long)]
    pub slack_app_id: String,
    /// Slack signing secret to verify incoming requests.
    #[arg(env = "SLACK_SIGNING_SECRET", hide_env_values = true, long)]
    pub slack_signing_secret: String,
    /// Slack OAuth client ID.
    #[arg(env = "SLACK_CLIENT_ID", long)]
    pub slack_client_id: String,
    /// Slack OAuth client secret.
    #[arg(env = "SLACK_CLIENT_SECRET", hide_env_values = true, long)]
    pub slack_client_secret: String,
    /// Slash command this app answers to.
    #[arg(env = "SLACK_COMMAND", long, default_value = "/hello-github-local")]
    pub slack_command: String,
    /// OAuth redirect URI, e.g. `https://example.com/api/slack/oauth_redirect`.
    #[arg(env = "SLACK_REDIRECT_URL", long)]
    pub slack_redirect_url: Option<String>,
    /// Bot scopes requested on install.
    #[arg(env, long, default_value = "chat:write,chat:write.public,commands")]
    pub slack_scopes: String,
    /// Base URL of the Slack Web API.
    #[arg(env, long, default_value = "https://slack.com/api/")]
    pub slack_api_url: Url,
}

#[allow(clippy::indexing_slicing)] // For automock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SlackClient: Send + Sync {
    /// `chat.postMessage` with a workspace bot token.
    async fn post_message(&self, token: &str, channel: &str, text: &str) -> Result<()>;

    /// Ephemeral reply to a slash command through its `response_url`.
    async fn respond(&self, response_url: &str, text: &str) -> Result<()>;

    /// `views.publish` for a user's App Home.
    async fn publish_view(&self, token: &str, user_id: &str, view: &Value) -> Result<()>;

    /// Finish the OAuth flow: `oauth.v2.access` then `auth.test` for the bot id.
    async fn oauth_access(&self, code: &str, redirect_uri: Option<String>) -> Result<Installation>;
}

#[derive(Debug, Deserialize)]
struct SlackStatus {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthAccess {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    bot_user_id: Option<String>,
    #[serde(default)]
    app_id: Option<String>,
    team: Option<Team>,
    #[serde(default)]
    enterprise: Option<Enterprise>,
    #[serde(default)]
    is_enterprise_install: bool,
}

#[derive(Debug, Deserialize)]
struct AuthTest {
    #[serde(default)]
    bot_id: Option<String>,
}

const OUR_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct SlackApiClient {
    http: ClientWithMiddleware,
    api_url: Url,
    client_id: String,
    client_secret: String,
}

impl SlackApiClient {
    pub fn new(config: ApiClientConfig, app: &SlackAppConfig) -> Result<Self> {
        Ok(Self {
            http: reqwest_client(config, OUR_USER_AGENT)?,
            api_url: app.slack_api_url.clone(),
            client_id: app.slack_client_id.clone(),
            client_secret: app.slack_client_secret.clone(),
        })
    }

    fn method_url(&self, method: &str) -> Result<Url> {
        Ok(self.api_url.join(method)?)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        req: reqwest_middleware::RequestBuilder,
    ) -> Result<T> {
        debug!("SlackClient calling {method}");
        let res = req
            .send()
            .await
            .with_context(|| format!("slack {method} request failed"))?;
        let status = res.status();
        let body = res.bytes().await?;
        if !status.is_success() {
            bail!(
                "slack {method} failed: code={status}, body:\n{}",
                String::from_utf8_lossy(&body)
            );
        }
        let outcome = serde_json::from_slice::<SlackStatus>(&body)
            .with_context(|| format!("slack {method} returned an invalid body"))?;
        if !outcome.ok {
            bail!(
                "slack {method} failed: {}",
                outcome.error.as_deref().unwrap_or("unknown_error")
            );
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl SlackClient for SlackApiClient {
    #[instrument(skip(self, token, text))]
    async fn post_message(&self, token: &str, channel: &str, text: &str) -> Result<()> {
        let req = self
            .http
            .post(self.method_url("chat.postMessage")?)
            .bearer_auth(token)
            .json(&json!({ "channel": channel, "text": text }));
        self.call::<Value>("chat.postMessage", req).await?;
        Ok(())
    }

    // response_url answers with plain `ok` text rather than JSON.
    #[instrument(skip_all)]
    async fn respond(&self, response_url: &str, text: &str) -> Result<()> {
        let url = Url::parse(response_url)
            .with_context(|| format!("invalid response_url: {response_url}"))?;
        let res = self
            .http
            .post(url)
            .json(&json!({ "response_type": "ephemeral", "text": text }))
            .send()
            .await
            .with_context(|| "responding to slash command failed")?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            bail!("responding to slash command failed: code={status}, body:\n{body}");
        }
        Ok(())
    }

    #[instrument(skip(self, token, view))]
    async fn publish_view(&self, token: &str, user_id: &str, view: &Value) -> Result<()> {
        let req = self
            .http
            .post(self.method_url("views.publish")?)
            .bearer_auth(token)
            .json(&json!({ "user_id": user_id, "view": view }));
        self.call::<Value>("views.publish", req).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn oauth_access(&self, code: &str, redirect_uri: Option<String>) -> Result<Installation> {
        let mut form = vec![("code", code.to_owned())];
        if let Some(uri) = redirect_uri {
            form.push(("redirect_uri", uri));
        }
        let req = self
            .http
            .post(self.method_url("oauth.v2.access")?)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&form);
        let access = self.call::<OAuthAccess>("oauth.v2.access", req).await?;

        let req = self
            .http
            .post(self.method_url("auth.test")?)
            .bearer_auth(&access.access_token);
        let auth = self.call::<AuthTest>("auth.test", req).await?;

        Ok(Installation {
            team: access.team,
            enterprise: access.enterprise,
            bot: Some(Bot {
                token: access.access_token,
                id: auth.bot_id,
                user_id: access.bot_user_id,
                scopes: access
                    .scope
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(ToOwned::to_owned)
                    .collect(),
            }),
            token_type: access.token_type,
            is_enterprise_install: access.is_enterprise_install,
            app_id: access.app_id,
            auth_version: Some("v2".to_owned()),
        })
    }
}
