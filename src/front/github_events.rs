use serde::{Deserialize, Serialize};

use crate::notifier::IssueOpened;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookCommonFields {
    #[serde(default)]
    pub action: String,
    pub repository: Repository,
    // Absent for deliveries not made on behalf of an App installation.
    #[serde(default)]
    pub installation: Option<InstallationRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: User,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallationRef {
    pub id: u64,
}

// https://docs.github.com/en/webhooks/webhook-events-and-payloads#issues
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuesEvent {
    #[serde(flatten)]
    pub common: WebhookCommonFields,
    pub issue: Issue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub html_url: String,
    #[serde(default)]
    pub title: String,
}

impl From<IssuesEvent> for IssueOpened {
    fn from(event: IssuesEvent) -> Self {
        let common = event.common;
        Self {
            owner: common.repository.owner.login,
            repo: common.repository.name,
            installation_id: common.installation.map(|i| i.id),
            issue_url: event.issue.html_url,
        }
    }
}
