use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shortest_engine::cli::{cmd_cache, cmd_run, CacheArgs, RunArgs};
use shortest_engine::config::EngineConfig;

#[derive(Parser, Debug)]
#[command(
    name = "shortest",
    version,
    about = "Natural-language browser test runner with AI action planning and trace caching"
)]
struct Cli {
    /// Engine config file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run test suites and report verdicts
    Run(RunArgs),
    /// Inspect or invalidate cached action traces
    Cache(CacheArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("shortest_engine=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run(args) => {
            let all_passed = cmd_run(args, &config).await?;
            if !all_passed {
                std::process::exit(1);
            }
        }
        Command::Cache(args) => cmd_cache(args, &config).await?,
    }
    Ok(())
}
