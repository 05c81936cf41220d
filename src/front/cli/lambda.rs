use anyhow::bail;
use clap::Args;
use lambda_http::run;

use crate::{
    cli::{Cli, CommandResult, SUCCESS},
    front::cli::{AppArgs, build_router},
    trace::{LogFormat, init_tracing},
};

#[derive(Debug, Clone, Args)]
pub struct LambdaArgs {
    #[command(flatten)]
    app: AppArgs,
}

pub async fn lambda(cli: Cli, args: LambdaArgs) -> CommandResult {
    init_tracing(&cli.verbose, LogFormat::Json);

    let app = build_router(args.app).await?;
    if let Err(e) = run(app).await {
        bail!("failed to run lambda: {e}");
    }
    SUCCESS
}
