//! Fan-out of "issue opened" webhook events to subscribed Slack channels.

use anyhow::{Context as _, Result};
use tracing::{info, instrument, warn};

use crate::{
    blob_store::BlobStore,
    github_client::GithubClient,
    installation_store::{InstallQuery, Installation},
    slack_client::SlackClient,
    state::AppState,
    subscription_store::{RepositoryScope, SubscriptionKey},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueOpened {
    pub owner: String,
    pub repo: String,
    pub installation_id: Option<u64>,
    pub issue_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    /// Keys dropped because their team has no installation or the key is not decodable.
    pub skipped: usize,
    pub failed: usize,
}

pub fn issue_message(issue_url: &str) -> String {
    format!("New issue opened: {issue_url}")
}

#[instrument(
    skip_all,
    fields(owner = %event.owner, repo = %event.repo, installation_id = ?event.installation_id),
)]
pub async fn notify_issue_opened<B, GH, SL>(
    state: &AppState<B, GH, SL>,
    event: &IssueOpened,
) -> Result<FanoutReport>
where
    B: BlobStore,
    GH: GithubClient,
    SL: SlackClient,
{
    let mut report = FanoutReport::default();
    let Some(installation_id) = event.installation_id.filter(|id| *id != 0) else {
        info!("event has no installation, skipping");
        return Ok(report);
    };
    let scope = RepositoryScope::new(
        &event.owner,
        &event.repo,
        &state.slack_app.slack_app_id,
        installation_id,
    )?;
    let keys = state
        .subscriptions
        .get_subscription_keys_for_repository(&scope)
        .await?;
    if keys.is_empty() {
        info!("no subscriptions found");
        return Ok(report);
    }

    let text = issue_message(&event.issue_url);
    // Installation of the team seen last, keys of one team are usually adjacent.
    let mut current: Option<(String, Option<Installation>)> = None;
    for raw in &keys {
        let key = match SubscriptionKey::decode(raw) {
            Ok(key) => key,
            Err(e) => {
                warn!(key = raw, "skipping undecodable subscription key: {e}");
                report.skipped += 1;
                continue;
            }
        };
        let team_id = key.team_id();
        let cached = current.as_ref().filter(|(team, _)| team == team_id);
        let installation = match cached {
            Some((_, installation)) => installation.clone(),
            None => {
                let installation = state
                    .installations
                    .fetch_installation(&InstallQuery::team(team_id))
                    .await
                    .with_context(|| {
                        format!("fan-out aborted: owner={}, repo={}", event.owner, event.repo)
                    })?;
                current = Some((team_id.to_owned(), installation.clone()));
                installation
            }
        };
        let Some(token) = installation.and_then(|i| i.bot).map(|bot| bot.token) else {
            warn!(team_id, channel_id = key.channel_id(), "no installation found for team");
            report.skipped += 1;
            continue;
        };

        match state
            .slack_client
            .post_message(&token, key.channel_id(), &text)
            .await
        {
            Ok(()) => {
                info!(team_id, channel_id = key.channel_id(), "issue notification delivered");
                report.delivered += 1;
            }
            Err(e) => {
                warn!(
                    team_id,
                    channel_id = key.channel_id(),
                    "failed to post issue notification: {e:#}"
                );
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        blob_store::MockBlobStore,
        front::config::FrontConfig,
        github_client::MockGithubClient,
        github_config::GithubAppConfig,
        installation_store::{InstallationStore, test::installation},
        slack_client::{MockSlackClient, SlackAppConfig},
        state::test::{TestState, state},
        subscription_store::{Subscription, SubscriptionStore},
    };

    const ISSUE_URL: &str = "https://github.com/monalisa/smile/issues/1";

    fn event(installation_id: Option<u64>) -> IssueOpened {
        IssueOpened {
            owner: "monalisa".to_owned(),
            repo: "smile".to_owned(),
            installation_id,
            issue_url: ISSUE_URL.to_owned(),
        }
    }

    async fn subscribe(
        state: &TestState,
        installation_id: u64,
        team_id: &str,
        channel_id: &str,
    ) -> Result<()> {
        let key = RepositoryScope::new("monalisa", "smile", "A012345", installation_id)?
            .subscription(team_id, channel_id)?;
        state
            .subscriptions
            .set(&key, &Subscription { slack_enterprise_id: false })
            .await
    }

    #[tokio::test]
    async fn delivers_to_every_subscribed_channel() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack
            .expect_post_message()
            .withf(|token, channel, text| {
                token == "xoxb-t1"
                    && (channel == "C1" || channel == "C2")
                    && text == "New issue opened: https://github.com/monalisa/smile/issues/1"
            })
            .times(2)
            .returning(|_, _, _| Ok(()));
        let state = state(MockGithubClient::new(), slack);
        state.installations.store_installation(&installation("T1", "xoxb-t1")).await?;
        subscribe(&state, 1, "T1", "C1").await?;
        subscribe(&state, 1, "T1", "C2").await?;

        let report = notify_issue_opened(&state, &event(Some(1))).await?;
        assert_eq!(report, FanoutReport { delivered: 2, skipped: 0, failed: 0 });
        Ok(())
    }

    #[tokio::test]
    async fn other_installations_are_not_notified() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack
            .expect_post_message()
            .withf(|_, channel, _| channel == "C1")
            .once()
            .returning(|_, _, _| Ok(()));
        let state = state(MockGithubClient::new(), slack);
        state.installations.store_installation(&installation("T1", "xoxb-t1")).await?;
        subscribe(&state, 1, "T1", "C1").await?;
        subscribe(&state, 12, "T1", "C12").await?;
        subscribe(&state, 2, "T1", "C2").await?;

        let report = notify_issue_opened(&state, &event(Some(1))).await?;
        assert_eq!(report.delivered, 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_installation_skips_only_that_team() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack
            .expect_post_message()
            .withf(|token, channel, _| token == "xoxb-t2" && channel == "C2")
            .once()
            .returning(|_, _, _| Ok(()));
        let state = state(MockGithubClient::new(), slack);
        state.installations.store_installation(&installation("T2", "xoxb-t2")).await?;
        subscribe(&state, 1, "T1", "C1").await?;
        subscribe(&state, 1, "T2", "C2").await?;

        let report = notify_issue_opened(&state, &event(Some(1))).await?;
        assert_eq!(report, FanoutReport { delivered: 1, skipped: 1, failed: 0 });
        Ok(())
    }

    #[tokio::test]
    async fn failed_post_does_not_stop_the_rest() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack
            .expect_post_message()
            .withf(|_, channel, _| channel == "C1")
            .once()
            .returning(|_, _, _| bail!("slack chat.postMessage failed: channel_not_found"));
        slack
            .expect_post_message()
            .withf(|_, channel, _| channel == "C2")
            .once()
            .returning(|_, _, _| Ok(()));
        let state = state(MockGithubClient::new(), slack);
        state.installations.store_installation(&installation("T1", "xoxb-t1")).await?;
        subscribe(&state, 1, "T1", "C1").await?;
        subscribe(&state, 1, "T1", "C2").await?;

        let report = notify_issue_opened(&state, &event(Some(1))).await?;
        assert_eq!(report, FanoutReport { delivered: 1, skipped: 0, failed: 1 });
        Ok(())
    }

    #[tokio::test]
    async fn no_subscriptions_is_a_noop() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack.expect_post_message().never();
        let state = state(MockGithubClient::new(), slack);
        let report = notify_issue_opened(&state, &event(Some(1))).await?;
        assert_eq!(report, FanoutReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn event_without_installation_is_a_noop() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack.expect_post_message().never();
        let state = state(MockGithubClient::new(), slack);
        state.installations.store_installation(&installation("T1", "xoxb-t1")).await?;
        subscribe(&state, 1, "T1", "C1").await?;
        let report = notify_issue_opened(&state, &event(None)).await?;
        assert_eq!(report, FanoutReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn zero_installation_id_is_a_noop() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack.expect_post_message().never();
        let state = state(MockGithubClient::new(), slack);
        let report = notify_issue_opened(&state, &event(Some(0))).await?;
        assert_eq!(report, FanoutReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn installation_store_failure_propagates() -> Result<()> {
        let mut slack = MockSlackClient::new();
        slack.expect_post_message().never();
        let key = RepositoryScope::new("monalisa", "smile", "A012345", 1)?
            .subscription("T1", "C1")?
            .encode();
        let mut subscriptions = MockBlobStore::new();
        subscriptions
            .expect_list()
            .returning(move |_| Ok(vec![key.clone()]));
        let mut installations = MockBlobStore::new();
        installations
            .expect_get()
            .once()
            .returning(|_| bail!("store unavailable"));
        let state = AppState::new(
            FrontConfig::default(),
            GithubAppConfig::default(),
            SlackAppConfig::default(),
            SubscriptionStore::new(subscriptions),
            InstallationStore::new(installations),
            MockGithubClient::new(),
            slack,
        );

        let err = notify_issue_opened(&state, &event(Some(1)))
            .await
            .expect_err("store failure must not be swallowed");
        assert!(format!("{err:#}").contains("store unavailable"), "{err:#}");
        assert!(format!("{err:#}").contains("team_id=T1"), "{err:#}");
        Ok(())
    }
}
