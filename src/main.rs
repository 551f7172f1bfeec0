use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vaporllm::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vaporllm=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { runner, prompt } => {
            vaporllm::cli::run(runner, prompt).await?;
        }
        Commands::Serve {
            runner,
            port,
            host,
            assets_dir,
        } => {
            vaporllm::cli::serve(runner, port, host, assets_dir).await?;
        }
        Commands::List { config, verbose } => {
            vaporllm::cli::list(config, verbose).await?;
        }
        Commands::Info { runner } => {
            vaporllm::cli::info(runner).await?;
        }
        Commands::Fetch {
            manifest,
            output,
            base_url,
        } => {
            vaporllm::cli::fetch(manifest, output, base_url).await?;
        }
    }

    Ok(())
}
