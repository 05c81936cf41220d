//! Repository to Slack channel subscriptions.
//!
//! Every subscription lives under its own key
//! `{owner}/{repo}/{notifying_app_id}/{installation_id}/{team_id}/{channel_id}`,
//! so two subscribers never write the same blob. All subscriptions of one
//! repository installation share the prefix `{owner}/{repo}/{notifying_app_id}/{installation_id}/`.
//! The trailing separator keeps installation `1` from matching installation `12`.

use std::{fmt, str::FromStr};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::blob_store::BlobStore;

pub const SUBSCRIPTIONS_NAMESPACE: &str = "repository-subscriptions";

const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("{0} must not be empty")]
    EmptySegment(&'static str),
    #[error("{field} must not contain '/': {value}")]
    SeparatorInSegment { field: &'static str, value: String },
    #[error("installation id must be a positive integer: {0}")]
    InvalidInstallationId(String),
    #[error("malformed subscription key: {0}")]
    Malformed(String),
}

/// One GitHub App installation on one repository, as seen by one Slack app.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryScope {
    owner: String,
    repo: String,
    notifying_app_id: String,
    installation_id: u64,
}

impl RepositoryScope {
    pub fn new(
        owner: &str,
        repo: &str,
        notifying_app_id: &str,
        installation_id: u64,
    ) -> Result<Self, KeyError> {
        if installation_id == 0 {
            return Err(KeyError::InvalidInstallationId(installation_id.to_string()));
        }
        Ok(Self {
            owner: segment("owner", owner)?,
            repo: segment("repo", repo)?,
            notifying_app_id: segment("notifying_app_id", notifying_app_id)?,
            installation_id,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn notifying_app_id(&self) -> &str {
        &self.notifying_app_id
    }

    pub fn installation_id(&self) -> u64 {
        self.installation_id
    }

    /// Prefix of every subscription key in this scope, including the trailing `/`.
    pub fn prefix(&self) -> String {
        format!(
            "{}/{}/{}/{}/",
            self.owner, self.repo, self.notifying_app_id, self.installation_id
        )
    }

    pub fn subscription(
        &self,
        team_id: &str,
        channel_id: &str,
    ) -> Result<SubscriptionKey, KeyError> {
        SubscriptionKey::new(self.clone(), team_id, channel_id)
    }
}

/// Full address of one notification destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    scope: RepositoryScope,
    team_id: String,
    channel_id: String,
}

impl SubscriptionKey {
    pub fn new(scope: RepositoryScope, team_id: &str, channel_id: &str) -> Result<Self, KeyError> {
        Ok(Self {
            scope,
            team_id: segment("team_id", team_id)?,
            channel_id: segment("channel_id", channel_id)?,
        })
    }

    pub fn scope(&self) -> &RepositoryScope {
        &self.scope
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn encode(&self) -> String {
        format!("{}{}/{}", self.scope.prefix(), self.team_id, self.channel_id)
    }

    pub fn decode(key: &str) -> Result<Self, KeyError> {
        let segments: Vec<&str> = key.split(SEPARATOR).collect();
        let [owner, repo, app_id, installation_id, team_id, channel_id] = segments.as_slice()
        else {
            return Err(KeyError::Malformed(key.to_owned()));
        };
        let installation_id = installation_id
            .parse::<u64>()
            .map_err(|_| KeyError::InvalidInstallationId((*installation_id).to_owned()))?;
        let scope = RepositoryScope::new(owner, repo, app_id, installation_id)?;
        Self::new(scope, team_id, channel_id)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for SubscriptionKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

fn segment(field: &'static str, value: &str) -> Result<String, KeyError> {
    if value.is_empty() {
        return Err(KeyError::EmptySegment(field));
    }
    if value.contains(SEPARATOR) {
        return Err(KeyError::SeparatorInSegment {
            field,
            value: value.to_owned(),
        });
    }
    Ok(value.to_owned())
}

/// Stored value of a subscription. The key carries the routing data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Whether the subscribing workspace belongs to an Enterprise Grid org.
    pub slack_enterprise_id: bool,
}

#[derive(Debug)]
pub struct SubscriptionStore<B: BlobStore> {
    blobs: B,
}

impl<B: BlobStore> SubscriptionStore<B> {
    pub fn new(blobs: B) -> Self {
        Self { blobs }
    }

    #[instrument(skip_all, fields(prefix = %scope.prefix()))]
    pub async fn get_subscription_keys_for_repository(
        &self,
        scope: &RepositoryScope,
    ) -> Result<Vec<String>> {
        let keys = self
            .blobs
            .list(&scope.prefix())
            .await
            .with_context(|| format!("listing subscriptions failed: {}", scope.prefix()))?;
        debug!(count = keys.len(), "listed subscription keys");
        Ok(keys)
    }

    pub async fn get(&self, key: &SubscriptionKey) -> Result<Option<Subscription>> {
        let Some(blob) = self
            .blobs
            .get(&key.encode())
            .await
            .with_context(|| format!("getting subscription failed: {key}"))?
        else {
            return Ok(None);
        };
        let subscription = serde_json::from_str(&blob)
            .with_context(|| format!("invalid subscription record: {key}, body={blob}"))?;
        Ok(Some(subscription))
    }

    pub async fn set(&self, key: &SubscriptionKey, subscription: &Subscription) -> Result<()> {
        let value = serde_json::to_value(subscription)?;
        self.blobs
            .set_json(&key.encode(), &value)
            .await
            .with_context(|| format!("storing subscription failed: {key}"))
    }

    pub async fn delete(&self, key: &SubscriptionKey) -> Result<()> {
        self.blobs
            .delete(&key.encode())
            .await
            .with_context(|| format!("deleting subscription failed: {key}"))
    }
}
