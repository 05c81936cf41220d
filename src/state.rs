use anyhow::Result;
use tokio::sync::OnceCell;

use crate::{
    blob_store::BlobStore,
    front::config::FrontConfig,
    github_client::{AppInfo, GithubClient},
    github_config::GithubAppConfig,
    installation_store::InstallationStore,
    slack_client::{SlackAppConfig, SlackClient},
    subscription_store::SubscriptionStore,
};

/// Everything one invocation needs. Built once per process; a cold start
/// simply builds a new one, nothing here must outlive the process.
#[derive(Debug)]
pub struct AppState<B: BlobStore, GH: GithubClient, SL: SlackClient> {
    pub config: FrontConfig,
    pub github_app: GithubAppConfig,
    pub slack_app: SlackAppConfig,
    pub subscriptions: SubscriptionStore<B>,
    pub installations: InstallationStore<B>,
    pub github_client: GH,
    pub slack_client: SL,
    app_info: OnceCell<AppInfo>,
}

impl<B: BlobStore, GH: GithubClient, SL: SlackClient> AppState<B, GH, SL> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: FrontConfig,
        github_app: GithubAppConfig,
        slack_app: SlackAppConfig,
        subscriptions: SubscriptionStore<B>,
        installations: InstallationStore<B>,
        github_client: GH,
        slack_client: SL,
    ) -> Self {
        Self {
            config,
            github_app,
            slack_app,
            subscriptions,
            installations,
            github_client,
            slack_client,
            app_info: OnceCell::new(),
        }
    }

    /// GitHub App public info, fetched on first use. Failures are not cached.
    pub async fn app_info(&self) -> Result<&AppInfo> {
        self.app_info
            .get_or_try_init(|| self.github_client.app_info())
            .await
    }

    #[cfg(test)]
    pub fn reset(&mut self) {
        self.app_info = OnceCell::new();
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::{
        blob_store::MemoryBlobStore, github_client::MockGithubClient,
        slack_client::MockSlackClient,
    };

    pub type TestState = AppState<MemoryBlobStore, MockGithubClient, MockSlackClient>;

    pub fn state(gh: MockGithubClient, slack: MockSlackClient) -> TestState {
        AppState::new(
            FrontConfig::default(),
            GithubAppConfig::default(),
            SlackAppConfig::default(),
            SubscriptionStore::new(MemoryBlobStore::new()),
            InstallationStore::new(MemoryBlobStore::new()),
            gh,
            slack,
        )
    }
}
