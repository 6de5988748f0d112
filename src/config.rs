//! Engine configuration: defaults, optional YAML file, then environment
//! overrides, merged in that order.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api_runner::RetryPolicy;
use crate::orchestrator::RunOptions;
use crate::planner::ToolCapabilities;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub cache: CacheSettings,
    pub planner: PlannerSettings,
    pub execution: ExecutionSettings,
    pub api: ApiSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            planner: PlannerSettings::default(),
            execution: ExecutionSettings::default(),
            api: ApiSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// `memory` or `file`.
    pub backend: CacheBackend,
    /// Root directory for the file backend; defaults to
    /// `<user cache dir>/shortest` when unset.
    pub root: Option<PathBuf>,
    /// Proactive expiry for sealed entries; `None` means reactive
    /// self-healing only.
    pub max_age_ms: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    File,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::File,
            root: None,
            max_age_ms: None,
        }
    }
}

impl CacheSettings {
    pub fn resolved_root(&self) -> PathBuf {
        if let Some(root) = &self.root {
            return root.clone();
        }
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("shortest")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerSettings {
    pub model: String,
    pub api_base: String,
    /// Environment variable holding the provider key.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    /// `desktop` or `mobile`; mobile disables pointer-hover tools.
    pub profile: PlannerProfile,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerProfile {
    Desktop,
    Mobile,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            api_base: "https://api.anthropic.com/v1".to_string(),
            api_key_env: "SHORTEST_API_KEY".to_string(),
            max_tokens: 1024,
            timeout_ms: 30_000,
            profile: PlannerProfile::Desktop,
        }
    }
}

impl PlannerSettings {
    pub fn capabilities(&self) -> ToolCapabilities {
        match self.profile {
            PlannerProfile::Desktop => ToolCapabilities::desktop(),
            PlannerProfile::Mobile => ToolCapabilities::mobile(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionSettings {
    pub planner_retries: u32,
    pub step_replans: u32,
    pub max_planner_turns: u32,
    pub action_timeout_ms: u64,
    pub test_timeout_ms: u64,
    pub parallelism: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            planner_retries: 1,
            step_replans: 1,
            max_planner_turns: 8,
            action_timeout_ms: 10_000,
            test_timeout_ms: 300_000,
            parallelism: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiSettings {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 250,
            request_timeout_ms: 10_000,
        }
    }
}

impl EngineConfig {
    /// Load defaults, merge the file at `path` when given, then apply
    /// environment overrides.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&raw)?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("SHORTEST_CACHE_DIR") {
            if !dir.trim().is_empty() {
                self.cache.root = Some(PathBuf::from(dir));
            }
        }
        if let Ok(model) = std::env::var("SHORTEST_MODEL") {
            if !model.trim().is_empty() {
                self.planner.model = model;
            }
        }
        if let Ok(base) = std::env::var("SHORTEST_API_BASE") {
            if !base.trim().is_empty() {
                self.planner.api_base = base;
            }
        }
        if let Ok(parallelism) = std::env::var("SHORTEST_PARALLELISM") {
            if let Ok(value) = parallelism.parse::<usize>() {
                self.execution.parallelism = value.max(1);
            }
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            capabilities: self.planner.capabilities(),
            planner_timeout: Duration::from_millis(self.planner.timeout_ms),
            action_timeout: Duration::from_millis(self.execution.action_timeout_ms),
            planner_retries: self.execution.planner_retries,
            step_replans: self.execution.step_replans,
            max_planner_turns: self.execution.max_planner_turns,
            test_timeout: Duration::from_millis(self.execution.test_timeout_ms),
            parallelism: self.execution.parallelism.max(1),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.api.max_retries,
            backoff_ms: self.api.backoff_ms,
        }
    }
}
