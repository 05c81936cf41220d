mod github_webhook;
mod health_check;
mod slack_commands;
mod slack_events;
mod slack_oauth;

pub use github_webhook::{github_webhook, method_not_allowed};
pub use health_check::health_check;
pub use slack_commands::slack_commands;
pub use slack_events::slack_events;
pub use slack_oauth::{slack_install, slack_oauth_redirect};

use anyhow::{Context as _, Result};
use http::HeaderMap;

fn get_header_str<'hdr>(headers: &'hdr HeaderMap, key: &str) -> Result<&'hdr str> {
    headers
        .get(key)
        .with_context(|| format!("missing {key} header field"))?
        .to_str()
        .map_err(Into::into)
}
