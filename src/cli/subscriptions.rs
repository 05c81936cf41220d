use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use tracing::{info, warn};

use crate::{
    blob_store::{BlobStore, MemoryBlobStore, S3BlobStore, StoreBackend, StoreConfig},
    cli::{Cli, CommandResult, FAILURE, SUCCESS},
    commands::parse_repository,
    subscription_store::{
        RepositoryScope, SUBSCRIPTIONS_NAMESPACE, SubscriptionKey, SubscriptionStore,
    },
    trace::{LogFormat, init_tracing},
};

#[derive(Debug, Clone, Subcommand)]
pub enum SubscriptionsCommands {
    /// List subscription keys of one repository installation.
    List(ListArgs),
    /// Delete one subscription by its full key.
    Delete(DeleteArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ListArgs {
    #[command(flatten)]
    store: StoreConfig,
    /// Repository as `owner/repo`.
    repository: String,
    /// GitHub App installation id on the repository.
    #[arg(long)]
    installation_id: u64,
    /// Slack App ID the subscriptions were made through.
    #[arg(env = "SLACK_APP_ID", long)]
    slack_app_id: String,
}

#[derive(Debug, Clone, Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    store: StoreConfig,
    /// `{owner}/{repo}/{slack_app_id}/{installation_id}/{team_id}/{channel_id}`
    key: SubscriptionKey,
}

impl SubscriptionsCommands {
    fn store_config(&self) -> &StoreConfig {
        match self {
            Self::List(args) => &args.store,
            Self::Delete(args) => &args.store,
        }
    }
}

pub async fn run(cli: Cli, c: SubscriptionsCommands) -> CommandResult {
    init_tracing(&cli.verbose, LogFormat::Plain);

    let config = c.store_config();
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("the memory store is empty outside a running server");
            dispatch(&SubscriptionStore::new(MemoryBlobStore::new()), c).await
        }
        StoreBackend::S3 => {
            let blobs = S3BlobStore::from_env(config, SUBSCRIPTIONS_NAMESPACE).await?;
            dispatch(&SubscriptionStore::new(blobs), c).await
        }
    }
}

async fn dispatch<B: BlobStore>(
    store: &SubscriptionStore<B>,
    c: SubscriptionsCommands,
) -> CommandResult {
    match c {
        SubscriptionsCommands::List(args) => {
            let keys = list(store, &args).await?;
            if keys.is_empty() {
                info!("no subscriptions found");
            }
            for key in keys {
                println!("{key}");
            }
            SUCCESS
        }
        SubscriptionsCommands::Delete(args) => {
            if delete(store, &args.key).await? {
                SUCCESS
            } else {
                FAILURE
            }
        }
    }
}

async fn list<B: BlobStore>(store: &SubscriptionStore<B>, args: &ListArgs) -> Result<Vec<String>> {
    let (owner, repo) = parse_repository(&args.repository)
        .with_context(|| format!("invalid repository: {}", args.repository))?;
    let scope = RepositoryScope::new(owner, repo, &args.slack_app_id, args.installation_id)?;
    store.get_subscription_keys_for_repository(&scope).await
}

/// Whether the subscription existed.
async fn delete<B: BlobStore>(store: &SubscriptionStore<B>, key: &SubscriptionKey) -> Result<bool> {
    if store.get(key).await?.is_none() {
        warn!(key = %key, "subscription not found");
        return Ok(false);
    }
    store.delete(key).await?;
    info!(key = %key, "subscription deleted");
    Ok(true)
}
