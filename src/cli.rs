mod subscriptions;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

use crate::front::cli::{lambda, server};

pub type CommandResult = anyhow::Result<ExitCode>;

pub const SUCCESS: CommandResult = Ok(ExitCode::SUCCESS);
// Indicates domain failures, not errors.
pub const FAILURE: CommandResult = Ok(ExitCode::FAILURE);

#[allow(clippy::partial_pub_fields)] // To use global options.
#[derive(Debug, Clone, Parser)]
#[command(version, about, args_override_self(true))]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Run the webhook and Slack front as a local HTTP server.
    Server(server::ServerArgs),
    /// Run the webhook and Slack front in AWS Lambda function.
    Lambda(lambda::LambdaArgs),
    #[command(subcommand)]
    /// Inspect and remove stored repository subscriptions.
    Subscriptions(subscriptions::SubscriptionsCommands),
}

pub async fn run() -> CommandResult {
    let cli = Cli::parse();
    let cli_clone = cli.clone();
    match cli.command {
        // Pass Cli to use global options. Is there a better way?
        Commands::Server(args) => server::server(cli_clone, args).await,
        Commands::Lambda(args) => lambda::lambda(cli_clone, args).await,
        Commands::Subscriptions(c) => subscriptions::run(cli_clone, c).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }
}
