//! `shortest cache`: inspect and invalidate cached action traces.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::cache::{CacheStore, FileCacheStore};
use crate::config::EngineConfig;

#[derive(Args, Clone, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,

    /// Override the configured cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum CacheCommand {
    /// List cached fingerprints
    List,
    /// Remove a single entry, forcing the next run to re-plan it
    Invalidate {
        /// Fingerprint to drop
        fingerprint: String,
    },
    /// Remove every cached entry
    Clear,
}

pub async fn cmd_cache(args: CacheArgs, config: &EngineConfig) -> Result<()> {
    let root = args
        .cache_dir
        .unwrap_or_else(|| config.cache.resolved_root());
    let store = FileCacheStore::new(root.clone())?;

    match args.command {
        CacheCommand::List => {
            let mut keys = store.keys()?;
            keys.sort();
            if keys.is_empty() {
                println!("cache at {} is empty", root.display());
            } else {
                for key in &keys {
                    println!("{key}");
                }
                println!("{} entr{}", keys.len(), if keys.len() == 1 { "y" } else { "ies" });
            }
        }
        CacheCommand::Invalidate { fingerprint } => {
            store.invalidate(&fingerprint)?;
            println!("invalidated {fingerprint}");
        }
        CacheCommand::Clear => {
            let keys = store.keys()?;
            let count = keys.len();
            for key in keys {
                store.invalidate(&key)?;
            }
            println!("cleared {count} entr{}", if count == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}
