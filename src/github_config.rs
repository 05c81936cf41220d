use anyhow::Result;
use clap::{Args, ValueEnum};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{Jitter, RetryTransientMiddleware, policies::ExponentialBackoff};

#[derive(Debug, Args, Clone)]
pub struct GithubAppConfig {
    /// GitHub App ID.
    #[arg(env = "GITHUB_APP_ID", long)]
    pub app_id: u64,
    /// GitHub App private key in PEM. Literal `\n` sequences are read as newlines.
    #[arg(env = "GITHUB_APP_PRIVATE_KEY", hide_env_values = true, long)]
    pub private_key: String,
    /// GitHub webhook secret to verify incoming webhook requests.
    #[arg(env = "GITHUB_WEBHOOK_SECRET", hide_env_values = true, long)]
    pub webhook_secret: String,
    /// Base URL of the GitHub REST API.
    #[arg(env, long, default_value = "https://api.github.com")]
    pub github_api_url: url::Url,
}

impl GithubAppConfig {
    // Env files and secret stores often keep the PEM on a single line.
    pub fn private_key_pem(&self) -> String {
        self.private_key.replace("\\n", "\n")
    }
}

// Default retry config is from retry-policies crate except for retry.
// Shared by the GitHub and the Slack clients.
#[derive(Debug, Args, Clone)]
pub struct ApiClientConfig {
    /// Connect timeout for outbound API requests.
    #[arg(env, long, default_value = "1s")]
    pub api_connect_timeout: humantime::Duration,
    /// Read timeout for outbound API requests. Currently applied from connect to read operation.
    #[arg(env, long, default_value = "5s")]
    pub api_read_timeout: humantime::Duration,
    /// Number of retries on transient failures.
    #[arg(env, long, default_value = "2")]
    pub api_max_retry: u32,
    /// Minimum interval between retries.
    #[arg(env, long, default_value = "500ms")]
    pub api_min_retry_interval: humantime::Duration,
    /// Maximum interval between retries.
    #[arg(env, long, default_value = "3s")]
    pub api_max_retry_interval: humantime::Duration,
    /// Jitter configuration for retry interval.
    #[arg(env, long, default_value = "full")]
    pub api_retry_jitter: JitterConfig,
    /// Base for exponential backoff.
    #[arg(env, long, default_value = "2")]
    pub api_retry_base: u32,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum JitterConfig {
    /// Don't apply any jitter.
    None,
    /// Jitter between 0 and the calculated backoff duration.
    Full,
    /// Jitter between `min_retry_interval` and the calculated backoff duration.
    Bounded,
}

impl From<JitterConfig> for Jitter {
    fn from(jitter: JitterConfig) -> Self {
        match jitter {
            JitterConfig::None => Self::None,
            JitterConfig::Full => Self::Full,
            JitterConfig::Bounded => Self::Bounded,
        }
    }
}

pub fn reqwest_client(config: ApiClientConfig, user_agent: &str) -> Result<ClientWithMiddleware> {
    let http = reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(config.api_connect_timeout.into())
        .read_timeout(config.api_read_timeout.into())
        .build()?;
    let retry_policy = ExponentialBackoff::builder()
        .jitter(config.api_retry_jitter.into())
        .base(config.api_retry_base)
        .retry_bounds(
            config.api_min_retry_interval.into(),
            config.api_max_retry_interval.into(),
        )
        .build_with_max_retries(config.api_max_retry);

    Ok(ClientBuilder::new(http)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}
