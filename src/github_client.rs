use anyhow::{Context as _, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::{Method, Response, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

use crate::github_config::{ApiClientConfig, GithubAppConfig, reqwest_client};

/// Public info of the GitHub App.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AppInfo {
    pub slug: String,
    pub html_url: String,
}

impl AppInfo {
    pub fn install_url(&self) -> String {
        format!("{}/installations/new", self.html_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct RepoInstallation {
    id: u64,
}

#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    iat: i64,
    exp: i64,
}

/// GitHub API calls made as the App itself, not as one of its installations.
#[allow(clippy::indexing_slicing)] // For automock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GithubClient: Send + Sync {
    /// Installation id of the App on the repository, `None` when the App is not installed there.
    async fn find_repo_installation(&self, owner: &str, repo: &str) -> Result<Option<u64>>;

    async fn app_info(&self) -> Result<AppInfo>;
}

const GITHUB_API_VERSION: &str = "2022-11-28";
const OUR_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

// ClientWithMiddleware can be cloned, it's like Arc::clone.
#[derive(Clone)]
pub struct AppJwtClient {
    client: ClientWithMiddleware,
    app_id: u64,
    key: EncodingKey,
    api_url: Url,
}

impl AppJwtClient {
    pub fn new(config: ApiClientConfig, app: &GithubAppConfig) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(app.private_key_pem().as_bytes())
            .with_context(|| "failed to parse GitHub private key")?;
        Ok(Self {
            client: reqwest_client(config, OUR_USER_AGENT)?,
            app_id: app.app_id,
            key,
            api_url: app.github_api_url.clone(),
        })
    }

    // Backdate iat against clock drift, GitHub rejects tokens living longer than 10 minutes.
    fn jwt(&self) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            iss: self.app_id.to_string(),
            iat: (now - Duration::seconds(60)).timestamp(),
            exp: (now + Duration::minutes(9)).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &self.key)?)
    }

    // Each segment is percent-encoded, so user input cannot leave its segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("GitHub API URL cannot be a base: {}", self.api_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, segments: &[&str]) -> Result<Response> {
        let url = self.endpoint(segments)?;
        debug!("GithubClient sending HTTP GET request to {url}");
        Ok(self
            .client
            .request(Method::GET, url)
            .header("accept", "application/vnd.github+json")
            .bearer_auth(self.jwt()?)
            .header("x-github-api-version", GITHUB_API_VERSION)
            .send()
            .await?)
    }
}

#[async_trait]
impl GithubClient for AppJwtClient {
    #[instrument(skip(self))]
    async fn find_repo_installation(&self, owner: &str, repo: &str) -> Result<Option<u64>> {
        let res = self
            .get(&["repos", owner, repo, "installation"])
            .await
            .with_context(|| format!("failed to get installation: owner={owner}, repo={repo}"))?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            info!("app is not installed on repository");
            return Ok(None);
        }
        let body = res.bytes().await?;
        if !status.is_success() {
            bail!(
                "failed to get installation: owner={owner}, repo={repo}, code={status}, body:\n{}",
                String::from_utf8_lossy(&body)
            );
        }
        let installation = serde_json::from_slice::<RepoInstallation>(&body)?;
        Ok(Some(installation.id))
    }

    async fn app_info(&self) -> Result<AppInfo> {
        let res = self.get(&["app"]).await?;
        let status = res.status();
        let body = res.bytes().await?;
        if !status.is_success() {
            bail!(
                "failed to get app info: code={status}, body:\n{}",
                String::from_utf8_lossy(&body)
            );
        }
        let info = serde_json::from_slice::<AppInfo>(&body)?;
        info!(slug = info.slug, url = info.html_url, "authenticated as GitHub App");
        Ok(info)
    }
}
