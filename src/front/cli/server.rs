use axum::{Router, ServiceExt, body::Body, serve};
use clap::Args;
use http::Request;
use tokio::net::TcpListener;
use tower_http::normalize_path::NormalizePath;

use crate::{
    cli::{Cli, CommandResult, SUCCESS},
    front::cli::{AppArgs, build_router},
    trace::{LogFormat, init_tracing},
};

#[derive(Debug, Clone, Args)]
pub struct ServerArgs {
    #[command(flatten)]
    app: AppArgs,
    /// The address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    address: String,
    /// The port to listen on.
    #[arg(long, env, default_value = "3000")]
    port: u16,
}

pub async fn server(cli: Cli, args: ServerArgs) -> CommandResult {
    init_tracing(&cli.verbose, LogFormat::Pretty);

    let app = build_router(args.app).await?;
    let app = <NormalizePath<Router> as ServiceExt<Request<Body>>>::into_make_service(app);

    let listener = TcpListener::bind([args.address, args.port.to_string()].join(":")).await?;
    println!("listening on {}", listener.local_addr()?);
    serve(listener, app).await?;

    SUCCESS
}
