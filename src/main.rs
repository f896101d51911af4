//! Binary entry point: parse the CLI, initialize tracing, run the command.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use konsilium::cli::{Cli, execute};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "konsilium=debug,info" } else { "konsilium=info,warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    execute(cli).await
}
