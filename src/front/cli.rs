pub mod lambda;
pub mod server;

use anyhow::Result;
use axum::Router;
use clap::Args;
use tower_http::normalize_path::NormalizePath;
use tracing::{info, warn};

use crate::{
    blob_store::{BlobStore, MemoryBlobStore, S3BlobStore, StoreBackend, StoreConfig},
    front::{config::FrontConfig, routes::build_app},
    github_client::AppJwtClient,
    github_config::{ApiClientConfig, GithubAppConfig},
    installation_store::{INSTALLATIONS_NAMESPACE, InstallationStore},
    secrets::resolve_ssm_refs,
    slack_client::{SlackApiClient, SlackAppConfig},
    state::AppState,
    subscription_store::{SUBSCRIPTIONS_NAMESPACE, SubscriptionStore},
};

/// Everything the HTTP front needs, shared by `server` and `lambda`.
#[derive(Debug, Clone, Args)]
pub struct AppArgs {
    #[command(flatten)]
    github_app: GithubAppConfig,
    #[command(flatten)]
    slack_app: SlackAppConfig,
    #[command(flatten)]
    api_client: ApiClientConfig,
    #[command(flatten)]
    store: StoreConfig,
    #[command(flatten)]
    config: FrontConfig,
}

impl AppArgs {
    async fn resolve_secrets(&mut self) -> Result<()> {
        resolve_ssm_refs(vec![
            &mut self.github_app.private_key,
            &mut self.github_app.webhook_secret,
            &mut self.slack_app.slack_signing_secret,
            &mut self.slack_app.slack_client_secret,
        ])
        .await
    }

    fn into_state<B: BlobStore>(
        self,
        subscriptions: B,
        installations: B,
    ) -> Result<AppState<B, AppJwtClient, SlackApiClient>> {
        let github_client = AppJwtClient::new(self.api_client.clone(), &self.github_app)?;
        let slack_client = SlackApiClient::new(self.api_client, &self.slack_app)?;
        Ok(AppState::new(
            self.config,
            self.github_app,
            self.slack_app,
            SubscriptionStore::new(subscriptions),
            InstallationStore::new(installations),
            github_client,
            slack_client,
        ))
    }
}

pub async fn build_router(mut args: AppArgs) -> Result<NormalizePath<Router>> {
    args.resolve_secrets().await?;
    match args.store.store_backend {
        StoreBackend::Memory => {
            warn!("using the in-memory store, subscriptions are lost on restart");
            let state = args.into_state(MemoryBlobStore::new(), MemoryBlobStore::new())?;
            Ok(build_app(state))
        }
        StoreBackend::S3 => {
            let subscriptions = S3BlobStore::from_env(&args.store, SUBSCRIPTIONS_NAMESPACE).await?;
            let installations = S3BlobStore::from_env(&args.store, INSTALLATIONS_NAMESPACE).await?;
            info!(bucket = ?args.store.store_bucket, "using the s3 store");
            let state = args.into_state(subscriptions, installations)?;
            Ok(build_app(state))
        }
    }
}
