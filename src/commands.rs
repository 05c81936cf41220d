//! `/<command> subscribe owner/repo` and friends.

use std::str::FromStr;

use anyhow::{Context as _, Result};
use indoc::formatdoc;
use strum::{Display, EnumString};
use tracing::{info, instrument, warn};
use url::form_urlencoded;

use crate::{
    blob_store::BlobStore,
    github_client::GithubClient,
    slack_client::SlackClient,
    state::AppState,
    subscription_store::{RepositoryScope, Subscription},
};

/// Slash command payload as posted by Slack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlashCommand {
    pub command: String,
    pub text: String,
    pub team_id: String,
    pub enterprise_id: Option<String>,
    pub channel_id: String,
    pub user_id: String,
    pub api_app_id: String,
    pub response_url: String,
}

impl SlashCommand {
    pub fn from_form(body: &str) -> Result<Self> {
        let mut command = Self::default();
        for (k, v) in form_urlencoded::parse(body.as_bytes()) {
            let v = v.into_owned();
            match k.as_ref() {
                "command" => command.command = v,
                "text" => command.text = v,
                "team_id" => command.team_id = v,
                "enterprise_id" if !v.is_empty() => command.enterprise_id = Some(v),
                "channel_id" => command.channel_id = v,
                "user_id" => command.user_id = v,
                "api_app_id" => command.api_app_id = v,
                "response_url" => command.response_url = v,
                _ => {}
            }
        }
        for (name, value) in [
            ("command", &command.command),
            ("team_id", &command.team_id),
            ("channel_id", &command.channel_id),
            ("response_url", &command.response_url),
        ] {
            if value.is_empty() {
                anyhow::bail!("slash command payload without {name}");
            }
        }
        Ok(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
enum Subcommand {
    Help,
    Subscribe,
}

/// What a command ended up doing. Every outcome has been answered to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Usage,
    UnknownSubcommand(String),
    InvalidRepository(String),
    NotInstalled { owner: String, repo: String },
    Subscribed { created: bool },
}

pub fn usage(command: &str) -> String {
    formatdoc! {"
        Usage: `{command} subscribe [repository]`
        Example: `{command} subscribe monalisa/smile`"
    }
}

/// Splits on runs of spaces and `+`, form encoders use either.
fn parse_text(text: &str) -> (&str, &str) {
    let mut words = text.split([' ', '+']).filter(|w| !w.is_empty());
    (words.next().unwrap_or_default(), words.next().unwrap_or_default())
}

/// Exactly `owner/repo`, each part made of the characters GitHub allows in names.
pub fn parse_repository(full_name: &str) -> Option<(&str, &str)> {
    let (owner, repo) = full_name.split_once('/')?;
    (is_name(owner) && is_name(repo)).then_some((owner, repo))
}

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[instrument(
    skip_all,
    fields(
        team_id = %command.team_id,
        channel_id = %command.channel_id,
        user_id = %command.user_id,
    ),
)]
pub async fn handle_command<B, GH, SL>(
    state: &AppState<B, GH, SL>,
    command: &SlashCommand,
) -> Result<CommandOutcome>
where
    B: BlobStore,
    GH: GithubClient,
    SL: SlackClient,
{
    let usage = usage(&state.slack_app.slack_command);
    let (subcommand, repository) = parse_text(&command.text);
    let (text, outcome) = match Subcommand::from_str(subcommand) {
        Ok(Subcommand::Help) => {
            info!("received help command");
            (usage, CommandOutcome::Usage)
        }
        Ok(Subcommand::Subscribe) => subscribe(state, command, repository, &usage).await?,
        Err(_) => {
            info!(subcommand, "received unknown subcommand");
            (
                format!("Unknown subcommand: `{subcommand}`\n\n{usage}"),
                CommandOutcome::UnknownSubcommand(subcommand.to_owned()),
            )
        }
    };
    state
        .slack_client
        .respond(&command.response_url, &text)
        .await
        .with_context(|| "failed to respond to slash command")?;
    Ok(outcome)
}

async fn subscribe<B, GH, SL>(
    state: &AppState<B, GH, SL>,
    command: &SlashCommand,
    repository: &str,
    usage: &str,
) -> Result<(String, CommandOutcome)>
where
    B: BlobStore,
    GH: GithubClient,
    SL: SlackClient,
{
    let Some((owner, repo)) = parse_repository(repository) else {
        info!(repository, "received subscribe with invalid repository");
        return Ok((
            format!("Invalid repository: `{repository}`\n\n{usage}"),
            CommandOutcome::InvalidRepository(repository.to_owned()),
        ));
    };

    let Some(installation_id) = state
        .github_client
        .find_repo_installation(owner, repo)
        .await?
    else {
        warn!(owner, repo, "app is not installed on repository");
        let app = state.app_info().await?;
        return Ok((
            format!(
                "GitHub App is not installed on `{repository}`. Install at {}",
                app.install_url()
            ),
            CommandOutcome::NotInstalled {
                owner: owner.to_owned(),
                repo: repo.to_owned(),
            },
        ));
    };

    let key = RepositoryScope::new(owner, repo, &state.slack_app.slack_app_id, installation_id)
        .and_then(|scope| scope.subscription(&command.team_id, &command.channel_id))
        .with_context(|| format!("invalid subscription key for {repository}"))?;
    let created = match state.subscriptions.get(&key).await? {
        Some(_) => {
            info!(key = %key, "subscription found");
            false
        }
        None => {
            let subscription = Subscription {
                slack_enterprise_id: command.enterprise_id.is_some(),
            };
            state.subscriptions.set(&key, &subscription).await?;
            info!(key = %key, "subscription created");
            true
        }
    };
    Ok((
        format!("subscribed to <https://github.com/{owner}/{repo}|{owner}/{repo}>"),
        CommandOutcome::Subscribed { created },
    ))
}
