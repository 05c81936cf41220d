use std::time::Duration;

use clap::Args;

#[derive(Debug, Args, Clone)]
pub struct FrontConfig {
    /// Soft deadline for webhook processing. When it passes the webhook is answered
    /// with 202 and processing continues in the background.
    #[arg(env, long, default_value = "9s")]
    pub response_timeout: humantime::Duration,
    /// Hard timeout for server to process each request.
    #[arg(env, long, default_value = "60s")]
    pub server_timeout: humantime::Duration,
    /// Accepted clock difference for Slack request timestamps.
    #[arg(env, long, default_value = "5m")]
    pub signature_max_skew: humantime::Duration,
    /// Lifetime of the OAuth `state` issued by the Slack install endpoint.
    #[arg(env, long, default_value = "10m")]
    pub oauth_state_max_age: humantime::Duration,
}

impl Default for FrontConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(9).into(),
            server_timeout: Duration::from_secs(60).into(),
            signature_max_skew: Duration::from_secs(60 * 5).into(),
            oauth_state_max_age: Duration::from_secs(60 * 10).into(),
        }
    }
}
