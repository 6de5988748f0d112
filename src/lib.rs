//! Natural-language browser test engine.
//!
//! Tests are plain-English instructions plus optional structured
//! parameters. An AI planner translates each instruction into concrete
//! browser or HTTP actions, the executor runs them against a driver
//! handle, and the resulting trace is cached so repeat runs skip planning
//! entirely. Caching is advisory: a stale trace triggers one self-healing
//! replan before the step fails.

pub mod api_runner;
pub mod cache;
pub mod cli;
pub mod config;
pub mod driver;
pub mod errors;
pub mod executor;
pub mod fingerprint;
pub mod orchestrator;
pub mod planner;
pub mod report;
pub mod test_def;

pub use api_runner::{ApiProbe, ApiRequestRunner, ApiResponse, RetryPolicy};
pub use cache::{
    ActionCache, CacheAction, CacheEntry, CacheStep, CacheStore, FileCacheStore, MemoryCacheStore,
    ToolName,
};
pub use config::EngineConfig;
pub use driver::{ClickTarget, Driver, DriverError, InMemoryDriver, PageSpec, PageState};
pub use errors::{ApiError, CacheIoError, ExecutionError, PlannerError, SetupError, StepError};
pub use executor::{ActionExecutor, ExecutionResult};
pub use fingerprint::fingerprint;
pub use orchestrator::{
    DriverFactory, Orchestrator, RunOptions, SharedDriverFactory, StepRecord, StepStatus,
    SuiteReport, TestStatus, TestVerdict,
};
pub use planner::{
    ActionPlanner, AnthropicConfig, AnthropicPlanner, Judgment, JudgmentStatus, MockPlanner,
    PlanRequest, PlannedAction, ToolCapabilities, TranscriptEntry,
};
pub use test_def::{hook, Hook, Step, StepKind, TestBuilder, TestDefinition, TestSuite};
