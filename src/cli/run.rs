//! `shortest run`: load YAML suite files, run them through the
//! orchestrator, print per-test verdicts, exit non-zero unless everything
//! passed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Args;
use serde::Deserialize;
use tracing::info;

use crate::api_runner::ApiRequestRunner;
use crate::cache::{ActionCache, CacheStore, FileCacheStore, MemoryCacheStore};
use crate::config::{CacheBackend, EngineConfig};
use crate::driver::{Driver, DriverError, InMemoryDriver, PageSpec};
use crate::executor::ActionExecutor;
use crate::orchestrator::{DriverFactory, Orchestrator};
use crate::planner::{ActionPlanner, AnthropicConfig, AnthropicPlanner, MockPlanner};
use crate::report;
use crate::test_def::{TestDefinition, TestSuite};

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Suite file or directory of .yaml/.yml suite files
    pub path: PathBuf,

    /// Planner backend
    #[arg(long, default_value = "anthropic", value_parser = ["anthropic", "mock"])]
    pub planner: String,

    /// Override the configured cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Bypass the action cache for this run
    #[arg(long)]
    pub no_cache: bool,

    /// Concurrent tests per suite
    #[arg(long)]
    pub parallel: Option<usize>,
}

/// Declarative application model carried in a test's `context` payload,
/// used to build an in-memory driver per test.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContextSpec {
    #[serde(default)]
    start_url: Option<String>,
    #[serde(default)]
    pages: HashMap<String, PageSpec>,
}

struct ContextDriverFactory {
    tests: Vec<TestDefinition>,
}

#[async_trait]
impl DriverFactory for ContextDriverFactory {
    async fn create(&self) -> Result<Arc<dyn Driver>, DriverError> {
        // One shared page model per suite; tests without context get an
        // empty model, which is fine for API-only suites.
        let spec = self
            .tests
            .iter()
            .find_map(|test| test.context.clone())
            .map(|value| serde_json::from_value::<ContextSpec>(value))
            .transpose()
            .map_err(|err| DriverError::Crashed(format!("invalid test context: {err}")))?
            .unwrap_or_default();
        let start = spec.start_url.unwrap_or_else(|| "about:blank".to_string());
        Ok(Arc::new(InMemoryDriver::new(spec.pages, start)))
    }
}

pub async fn cmd_run(args: RunArgs, config: &EngineConfig) -> Result<bool> {
    let mut config = config.clone();
    if let Some(dir) = &args.cache_dir {
        config.cache.root = Some(dir.clone());
    }
    if let Some(parallel) = args.parallel {
        config.execution.parallelism = parallel.max(1);
    }

    let suites = load_suites(&args.path)?;
    if suites.is_empty() {
        bail!("no suite files found under {}", args.path.display());
    }

    let store: Arc<dyn CacheStore> = if args.no_cache {
        Arc::new(MemoryCacheStore::default())
    } else {
        match config.cache.backend {
            CacheBackend::Memory => Arc::new(MemoryCacheStore::default()),
            CacheBackend::File => Arc::new(FileCacheStore::new(config.cache.resolved_root())?),
        }
    };
    let cache = Arc::new(ActionCache::new(store).with_max_age_ms(config.cache.max_age_ms));

    let planner: Arc<dyn ActionPlanner> = match args.planner.as_str() {
        "mock" => Arc::new(MockPlanner::passing()),
        _ => {
            let api_key = std::env::var(&config.planner.api_key_env).with_context(|| {
                format!(
                    "planner api key not set (expected in ${})",
                    config.planner.api_key_env
                )
            })?;
            Arc::new(AnthropicPlanner::new(AnthropicConfig {
                api_key,
                model: config.planner.model.clone(),
                api_base: config.planner.api_base.clone(),
                max_tokens: config.planner.max_tokens,
                timeout: Duration::from_millis(config.planner.timeout_ms),
            })?)
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        cache,
        planner,
        ActionExecutor::new(Duration::from_millis(config.execution.action_timeout_ms)),
        ApiRequestRunner::new(
            config.retry_policy(),
            Duration::from_millis(config.api.request_timeout_ms),
        )?,
        config.run_options(),
    ));

    let mut all_passed = true;
    for suite in suites {
        info!(suite = %suite.name, "loaded suite");
        let factory = Arc::new(ContextDriverFactory {
            tests: suite.tests.clone(),
        });
        let report = orchestrator.run_suite(&suite, factory).await;
        print!("{}", report::render(&report));
        all_passed &= report.all_passed();
    }
    Ok(all_passed)
}

fn load_suites(path: &Path) -> Result<Vec<TestSuite>> {
    let mut files = Vec::new();
    if path.is_dir() {
        for entry in std::fs::read_dir(path)
            .with_context(|| format!("reading {}", path.display()))?
        {
            let entry = entry?;
            let candidate = entry.path();
            let is_yaml = candidate
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if entry.file_type()?.is_file() && is_yaml {
                files.push(candidate);
            }
        }
        files.sort();
    } else {
        files.push(path.to_path_buf());
    }

    let mut suites = Vec::new();
    for file in files {
        let raw = std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        let suite = TestSuite::from_yaml(&raw)
            .with_context(|| format!("parsing {}", file.display()))?;
        suites.push(suite);
    }
    Ok(suites)
}
