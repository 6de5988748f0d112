//! Error taxonomy for the test engine.
//!
//! Assertion failures are verdicts, not errors: a test whose instruction
//! simply did not hold reports `Failed`, while the variants below all mean
//! the infrastructure (hooks, planner, driver, transport, cache storage)
//! misbehaved and the test reports `Erred`.

use thiserror::Error;

/// Lifecycle hook failure. Fatal to the tests the hook owns, nothing else.
#[derive(Debug, Error)]
#[error("hook '{hook}' failed: {message}")]
pub struct SetupError {
    pub hook: String,
    pub message: String,
}

impl SetupError {
    pub fn new(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by the action planner adapter.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Provider endpoint could not be reached or returned a transport error.
    #[error("planner unreachable: {0}")]
    Unreachable(String),

    /// Provider replied with something other than one tool_use or one text block.
    #[error("malformed planner response: {0}")]
    MalformedResponse(String),

    /// Provider emitted a tool name outside the configured capability set.
    #[error("planner emitted disallowed tool '{0}'")]
    DisallowedTool(String),

    /// Provider returned a non-success status.
    #[error("planner returned status {status}: {detail}")]
    Provider { status: u16, detail: String },

    /// Planning call exceeded its response-time budget.
    #[error("planner timed out after {0}ms")]
    Timeout(u64),
}

/// Driver-level failure while executing a planned action. Carries enough
/// detail for the orchestrator's self-healing replan.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("target '{target}' not found")]
    TargetNotFound { target: String },

    #[error("timed out after {timeout_ms}ms waiting on '{target}'")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("driver failure: {0}")]
    Driver(String),

    /// A stored action no longer parses against the executor's tool inputs.
    #[error("invalid action payload for tool '{tool}': {detail}")]
    InvalidAction { tool: String, detail: String },
}

/// Transport-level failure from the API request runner. Produced only after
/// the configured retry budget is exhausted; a delivered non-2xx response is
/// an assertion outcome, never an `ApiError`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed after {attempts} attempt(s): {detail}")]
    Transport { attempts: u32, detail: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Cache storage read/write failure. Logged by callers; a run proceeds
/// without caching for the affected fingerprint rather than aborting.
#[derive(Debug, Error)]
pub enum CacheIoError {
    #[error("cache io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Umbrella for everything that can sink a single step. Keeps the final
/// report able to tell an app-under-test bug from an engine problem.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("test exceeded its {0}ms budget")]
    TestTimeout(u64),
}
