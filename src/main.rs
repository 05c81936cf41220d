use std::process::ExitCode;

use anyhow::Result;

use hello_github::cli::run;

#[allow(clippy::use_debug)]
#[tokio::main]
async fn main() -> Result<ExitCode> {
    run().await
}
