use anyhow::{Context as _, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::blob_store::BlobStore;

pub const INSTALLATIONS_NAMESPACE: &str = "slack-installations";

/// Slack OAuth installation of this app into one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub team: Option<Team>,
    #[serde(default)]
    pub enterprise: Option<Enterprise>,
    pub bot: Option<Bot>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub is_enterprise_install: bool,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub auth_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enterprise {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bot {
    pub token: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallQuery {
    pub team_id: Option<String>,
    pub enterprise_id: Option<String>,
    // Enterprise-wide installs are not routed yet, lookups are by team only.
    pub is_enterprise_install: bool,
}

impl InstallQuery {
    pub fn team(team_id: &str) -> Self {
        Self {
            team_id: Some(team_id.to_owned()),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct InstallationStore<B: BlobStore> {
    blobs: B,
}

impl<B: BlobStore> InstallationStore<B> {
    pub fn new(blobs: B) -> Self {
        Self { blobs }
    }

    #[instrument(skip_all)]
    pub async fn store_installation(&self, installation: &Installation) -> Result<()> {
        let Some(team) = &installation.team else {
            bail!("failed to save installation: no team in installation");
        };
        let value = serde_json::to_value(installation)?;
        self.blobs
            .set_json(&team.id, &value)
            .await
            .with_context(|| format!("failed to save installation: team_id={}", team.id))?;
        info!(team_id = team.id, "installation stored");
        Ok(())
    }

    pub async fn fetch_installation(&self, query: &InstallQuery) -> Result<Option<Installation>> {
        let team_id = query_team_id(query, "fetch")?;
        let Some(blob) = self
            .blobs
            .get(team_id)
            .await
            .with_context(|| format!("failed to fetch installation: team_id={team_id}"))?
        else {
            return Ok(None);
        };
        let installation = serde_json::from_str(&blob)
            .with_context(|| format!("invalid installation record: team_id={team_id}"))?;
        Ok(Some(installation))
    }

    #[instrument(skip_all, fields(team_id = ?query.team_id))]
    pub async fn delete_installation(&self, query: &InstallQuery) -> Result<()> {
        let team_id = query_team_id(query, "delete")?;
        self.blobs
            .delete(team_id)
            .await
            .with_context(|| format!("failed to delete installation: team_id={team_id}"))?;
        info!("installation deleted");
        Ok(())
    }
}

fn query_team_id<'query>(query: &'query InstallQuery, op: &str) -> Result<&'query str> {
    query
        .team_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .with_context(|| format!("failed to {op} installation: team id is required"))
}

#[cfg(test)]
pub mod test {
    use super::*;

    pub fn installation(team_id: &str, token: &str) -> Installation {
        Installation {
            team: Some(Team {
                id: team_id.to_owned(),
                name: None,
            }),
            bot: Some(Bot {
                token: token.to_owned(),
                id: Some(format!("B{team_id}")),
                ..Default::default()
            }),
            token_type: Some("bot".to_owned()),
            auth_version: Some("v2".to_owned()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::blob_store::MemoryBlobStore;

    #[tokio::test]
    async fn store_fetch_delete() -> Result<()> {
        let store = InstallationStore::new(MemoryBlobStore::new());
        let installation = test::installation("T1", "xoxb-1");
        store.store_installation(&installation).await?;

        let fetched = store.fetch_installation(&InstallQuery::team("T1")).await?;
        assert_eq!(fetched, Some(installation));
        assert_eq!(store.fetch_installation(&InstallQuery::team("T2")).await?, None);

        store.delete_installation(&InstallQuery::team("T1")).await?;
        assert_eq!(store.fetch_installation(&InstallQuery::team("T1")).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn reinstall_overwrites() -> Result<()> {
        let store = InstallationStore::new(MemoryBlobStore::new());
        store.store_installation(&test::installation("T1", "old")).await?;
        store.store_installation(&test::installation("T1", "new")).await?;
        let fetched = store.fetch_installation(&InstallQuery::team("T1")).await?;
        assert_eq!(fetched.and_then(|i| i.bot).map(|b| b.token).as_deref(), Some("new"));
        Ok(())
    }

    #[tokio::test]
    async fn team_is_required() {
        let store = InstallationStore::new(MemoryBlobStore::new());
        assert!(store.store_installation(&Installation::default()).await.is_err());
        assert!(store.fetch_installation(&InstallQuery::default()).await.is_err());
        assert!(store.delete_installation(&InstallQuery::default()).await.is_err());
    }

    #[test]
    fn record_json_shape() -> Result<()> {
        let value = serde_json::to_value(test::installation("T1", "xoxb-1"))?;
        assert_eq!(value["team"]["id"], json!("T1"));
        assert_eq!(value["bot"]["token"], json!("xoxb-1"));
        assert_eq!(value["tokenType"], json!("bot"));
        assert_eq!(value["isEnterpriseInstall"], json!(false));
        assert_eq!(value["authVersion"], json!("v2"));
        Ok(())
    }
}
