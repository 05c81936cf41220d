pub mod cli;

mod app_error;
mod blob_store;
mod commands;
mod front;
mod github_client;
mod github_config;
mod installation_store;
mod notifier;
mod request_verifier;
mod secrets;
mod slack_client;
mod state;
mod subscription_store;
mod trace;
