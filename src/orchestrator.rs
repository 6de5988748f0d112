//! Drives test definitions through hooks and steps: cache replay on hit,
//! AI planning on miss, one self-healing replan when a cached trace no
//! longer matches the application, and trace persistence once a test
//! passes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api_runner::{ApiProbe, ApiRequestRunner};
use crate::cache::{ActionCache, CacheAction, CacheEntry, CacheStep, RecordingGuard};
use crate::driver::{Driver, DriverError};
use crate::errors::{ExecutionError, PlannerError, SetupError, StepError};
use crate::executor::{ActionExecutor, ExecutionResult};
use crate::fingerprint::fingerprint;
use crate::planner::{
    ActionPlanner, Judgment, PlanRequest, PlannedAction, ToolCapabilities, TranscriptEntry,
};
use crate::test_def::{Hook, Step, StepKind, TestDefinition, TestSuite};

/// Per-run tuning knobs.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub capabilities: ToolCapabilities,
    /// Budget for a single planner call.
    pub planner_timeout: Duration,
    /// Budget for a single executor call against the driver.
    pub action_timeout: Duration,
    /// Automatic retries when a planner call itself errors.
    pub planner_retries: u32,
    /// Self-healing replan budget per step.
    pub step_replans: u32,
    /// Planner turns allowed before a step must reach a terminal judgment.
    pub max_planner_turns: u32,
    /// Whole-test budget; exceeding it errs the test.
    pub test_timeout: Duration,
    /// Concurrent tests within a suite. Steps are always sequential.
    pub parallelism: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            capabilities: ToolCapabilities::desktop(),
            planner_timeout: Duration::from_secs(30),
            action_timeout: Duration::from_secs(30),
            planner_retries: 1,
            step_replans: 1,
            max_planner_turns: 8,
            test_timeout: Duration::from_secs(300),
            parallelism: 1,
        }
    }
}

/// Orchestrator run states. Tracked for observability; the terminal three
/// map onto [`TestStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Pending,
    SettingUp,
    Running(usize),
    Passed,
    Failed,
    Erred,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Every step's success condition held.
    Passed,
    /// An instruction's success condition did not hold: an app bug.
    Failed,
    /// Hooks, planner, driver, or transport misbehaved: an engine problem.
    Erred,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Erred,
}

/// Per-step outcome with captured evidence.
#[derive(Clone, Debug, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub kind: StepKind,
    pub instruction: String,
    pub status: StepStatus,
    pub evidence: String,
    pub error: Option<String>,
    pub cache_hit: bool,
    pub timestamp: i64,
}

/// Final verdict for one test.
#[derive(Clone, Debug, Serialize)]
pub struct TestVerdict {
    pub name: String,
    pub status: TestStatus,
    pub steps: Vec<StepRecord>,
    pub failure: Option<String>,
    pub duration_ms: u64,
}

impl TestVerdict {
    fn erred(name: &str, reason: String, steps: Vec<StepRecord>, started: Instant) -> Self {
        Self {
            name: name.to_string(),
            status: TestStatus::Erred,
            steps,
            failure: Some(reason),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Aggregate outcome for a suite.
#[derive(Debug, Serialize)]
pub struct SuiteReport {
    pub name: String,
    pub verdicts: Vec<TestVerdict>,
    pub teardown_error: Option<String>,
}

impl SuiteReport {
    pub fn all_passed(&self) -> bool {
        self.teardown_error.is_none()
            && self
                .verdicts
                .iter()
                .all(|verdict| verdict.status == TestStatus::Passed)
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let mut passed = 0;
        let mut failed = 0;
        let mut erred = 0;
        for verdict in &self.verdicts {
            match verdict.status {
                TestStatus::Passed => passed += 1,
                TestStatus::Failed => failed += 1,
                TestStatus::Erred => erred += 1,
            }
        }
        (passed, failed, erred)
    }
}

/// Creates one driver handle per test so parallel tests never share
/// browser state.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn Driver>, DriverError>;
}

/// Factory over a fixed handle, for embeddings that run tests one at a time.
pub struct SharedDriverFactory(pub Arc<dyn Driver>);

#[async_trait]
impl DriverFactory for SharedDriverFactory {
    async fn create(&self) -> Result<Arc<dyn Driver>, DriverError> {
        Ok(Arc::clone(&self.0))
    }
}

pub struct Orchestrator {
    cache: Arc<ActionCache>,
    planner: Arc<dyn ActionPlanner>,
    executor: ActionExecutor,
    api_runner: ApiRequestRunner,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(
        cache: Arc<ActionCache>,
        planner: Arc<dyn ActionPlanner>,
        executor: ActionExecutor,
        api_runner: ApiRequestRunner,
        options: RunOptions,
    ) -> Self {
        Self {
            cache,
            planner,
            executor,
            api_runner,
            options,
        }
    }

    /// Run a whole suite: beforeAll once, each test (beforeEach first),
    /// afterAll once at the end regardless of outcomes.
    pub async fn run_suite(
        self: &Arc<Self>,
        suite: &TestSuite,
        drivers: Arc<dyn DriverFactory>,
    ) -> SuiteReport {
        let run_id = Uuid::new_v4();
        info!(suite = %suite.name, %run_id, tests = suite.tests.len(), "running suite");

        if let Some(hook) = &suite.before_all {
            if let Err(message) = hook().await {
                let err = SetupError::new("beforeAll", message);
                warn!(suite = %suite.name, %err, "beforeAll failed; aborting owned tests");
                let verdicts = suite
                    .tests
                    .iter()
                    .map(|test| TestVerdict::erred(&test.name, err.to_string(), Vec::new(), Instant::now()))
                    .collect();
                return SuiteReport {
                    name: suite.name.clone(),
                    verdicts,
                    teardown_error: self.run_after_all(suite).await,
                };
            }
        }

        let verdicts = if self.options.parallelism > 1 {
            self.run_tests_parallel(suite, drivers).await
        } else {
            self.run_tests_sequential(suite, drivers).await
        };

        SuiteReport {
            name: suite.name.clone(),
            verdicts,
            teardown_error: self.run_after_all(suite).await,
        }
    }

    async fn run_after_all(&self, suite: &TestSuite) -> Option<String> {
        let hook = suite.after_all.as_ref()?;
        match hook().await {
            Ok(()) => None,
            Err(message) => {
                let err = SetupError::new("afterAll", message);
                warn!(suite = %suite.name, %err, "afterAll failed");
                Some(err.to_string())
            }
        }
    }

    async fn run_tests_sequential(
        &self,
        suite: &TestSuite,
        drivers: Arc<dyn DriverFactory>,
    ) -> Vec<TestVerdict> {
        let mut verdicts = Vec::with_capacity(suite.tests.len());
        for test in &suite.tests {
            verdicts.push(self.run_owned_test(test, drivers.as_ref(), suite.before_each.clone()).await);
        }
        verdicts
    }

    async fn run_tests_parallel(
        self: &Arc<Self>,
        suite: &TestSuite,
        drivers: Arc<dyn DriverFactory>,
    ) -> Vec<TestVerdict> {
        let semaphore = Arc::new(Semaphore::new(self.options.parallelism));
        let mut set = JoinSet::new();
        for (index, test) in suite.tests.iter().cloned().enumerate() {
            let orchestrator = Arc::clone(self);
            let drivers = Arc::clone(&drivers);
            let before_each = suite.before_each.clone();
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire().await;
                let verdict = orchestrator
                    .run_owned_test(&test, drivers.as_ref(), before_each)
                    .await;
                (index, verdict)
            });
        }

        let mut indexed = Vec::with_capacity(suite.tests.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => indexed.push(pair),
                Err(err) => warn!(%err, "test task panicked"),
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, verdict)| verdict).collect()
    }

    async fn run_owned_test(
        &self,
        test: &TestDefinition,
        drivers: &dyn DriverFactory,
        before_each: Option<Hook>,
    ) -> TestVerdict {
        let started = Instant::now();
        let driver = match drivers.create().await {
            Ok(driver) => driver,
            Err(err) => {
                return TestVerdict::erred(
                    &test.name,
                    format!("driver unavailable: {err}"),
                    Vec::new(),
                    started,
                )
            }
        };
        self.run_test(test, driver, before_each).await
    }

    /// Run one test against a dedicated driver handle.
    pub async fn run_test(
        &self,
        test: &TestDefinition,
        driver: Arc<dyn Driver>,
        before_each: Option<Hook>,
    ) -> TestVerdict {
        let started = Instant::now();
        let mut state = RunState::Pending;
        debug!(test = %test.name, ?state, "starting test");

        state = RunState::SettingUp;
        debug!(test = %test.name, ?state, "running hooks");
        if let Some(hook) = before_each {
            if let Err(message) = hook().await {
                let err: StepError = SetupError::new("beforeEach", message).into();
                return TestVerdict::erred(&test.name, err.to_string(), Vec::new(), started);
            }
        }

        let budget = self.options.test_timeout;
        let outcome = tokio::time::timeout(budget, self.run_steps(test, driver.as_ref())).await;
        let (status, steps, failure) = match outcome {
            Ok(result) => result,
            Err(_) => {
                let err = StepError::TestTimeout(budget.as_millis() as u64);
                return TestVerdict::erred(&test.name, err.to_string(), Vec::new(), started);
            }
        };

        state = match status {
            TestStatus::Passed => RunState::Passed,
            TestStatus::Failed => RunState::Failed,
            TestStatus::Erred => RunState::Erred,
        };
        debug!(test = %test.name, ?state, "test finished");

        TestVerdict {
            name: test.name.clone(),
            status,
            steps,
            failure,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn run_steps(
        &self,
        test: &TestDefinition,
        driver: &dyn Driver,
    ) -> (TestStatus, Vec<StepRecord>, Option<String>) {
        let mut records = Vec::with_capacity(test.steps.len());
        let mut pending: Vec<(String, CacheEntry, Option<RecordingGuard>)> = Vec::new();
        let mut status = TestStatus::Passed;
        let mut failure = None;

        for (index, step) in test.steps.iter().enumerate() {
            debug!(test = %test.name, step = index, state = ?RunState::Running(index), "running step");
            let record = if let Some(probe) = &step.api {
                self.run_api_step(index, step, probe).await
            } else {
                self.run_browser_step(index, step, driver, &mut pending).await
            };

            let step_status = record.status;
            if step_status != StepStatus::Passed {
                failure = record
                    .error
                    .clone()
                    .or_else(|| Some(record.evidence.clone()));
            }
            records.push(record);
            match step_status {
                StepStatus::Passed => {}
                StepStatus::Failed => {
                    status = TestStatus::Failed;
                    break;
                }
                StepStatus::Erred => {
                    status = TestStatus::Erred;
                    break;
                }
            }
        }

        match status {
            TestStatus::Passed => {
                // Seal the traces recorded during this run. Runs that lost
                // the per-fingerprint writer race drop their contribution.
                for (fp, entry, guard) in pending {
                    if guard.is_none() {
                        debug!(fingerprint = %fp, "skipping cache write (concurrent recorder)");
                        continue;
                    }
                    if let Err(err) = self.cache.put(&fp, entry) {
                        warn!(%err, fingerprint = %fp, "failed to persist trace; run unaffected");
                    }
                }
            }
            _ => {
                // Partial traces are never persisted; the next run replans.
                drop(pending);
            }
        }

        (status, records, failure)
    }

    async fn run_api_step(&self, index: usize, step: &Step, probe: &ApiProbe) -> StepRecord {
        match self.api_runner.fetch(probe).await {
            Ok(response) => {
                if response.satisfies(probe) {
                    step_record(index, step, StepStatus::Passed, format!("status {}", response.status), None, false)
                } else {
                    let detail = format!(
                        "expected {}, got {}: {}",
                        probe
                            .expect_status
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "2xx".to_string()),
                        response.status,
                        truncate(&response.body, 200),
                    );
                    step_record(index, step, StepStatus::Failed, detail.clone(), Some(detail), false)
                }
            }
            Err(err) => {
                let err: StepError = err.into();
                step_record(index, step, StepStatus::Erred, String::new(), Some(err.to_string()), false)
            }
        }
    }

    async fn run_browser_step(
        &self,
        index: usize,
        step: &Step,
        driver: &dyn Driver,
        pending: &mut Vec<(String, CacheEntry, Option<RecordingGuard>)>,
    ) -> StepRecord {
        let fp = fingerprint(&step.instruction, &step.params, index, step.url.as_deref());

        // A literal URL override is applied before the instruction runs.
        if let Some(url) = &step.url {
            if let Err(err) = driver.navigate(url).await {
                let err: StepError = ExecutionError::Driver(err.to_string()).into();
                return step_record(index, step, StepStatus::Erred, String::new(), Some(err.to_string()), false);
            }
        }

        let mut cache_hit = false;
        if let Some(entry) = self.cache.lookup(&fp) {
            cache_hit = true;
            debug!(fingerprint = %fp, "cache hit; replaying trace");
            match self.replay_entry(&entry, driver).await {
                Ok(result) => {
                    return result_record(index, step, result, true);
                }
                Err(err) => {
                    // Self-healing: invalidate the stale trace and fall
                    // through to exactly one fresh planning pass.
                    warn!(fingerprint = %fp, %err, "cached trace failed; replanning");
                    self.cache.invalidate(&fp);
                }
            }
        }

        match self.plan_step(step, driver, &fp).await {
            Ok((result, trace, guard)) => {
                pending.push((fp, CacheEntry::new(trace), guard));
                result_record(index, step, result, cache_hit)
            }
            Err(err) => step_record(
                index,
                step,
                StepStatus::Erred,
                String::new(),
                Some(err.to_string()),
                cache_hit,
            ),
        }
    }

    /// Replay a sealed trace without consulting the planner. Tool actions
    /// re-run through the executor; pure-assertion steps return the stored
    /// verdict directly.
    async fn replay_entry(
        &self,
        entry: &CacheEntry,
        driver: &dyn Driver,
    ) -> Result<ExecutionResult, ExecutionError> {
        let mut last = ExecutionResult::passed("empty trace");
        for step in &entry.steps {
            match &step.action {
                Some(action) => {
                    last = self.execute_bounded(action, driver).await?;
                    if !last.passed {
                        return Ok(last);
                    }
                }
                None => {
                    last = ExecutionResult::passed(step.result.clone().unwrap_or_default());
                }
            }
        }
        Ok(last)
    }

    /// Fresh planning loop for one step: plan, execute, feed the transcript
    /// back, until the planner reaches a terminal judgment. Executor
    /// failures consume the bounded replan budget.
    async fn plan_step(
        &self,
        step: &Step,
        driver: &dyn Driver,
        fp: &str,
    ) -> Result<(ExecutionResult, Vec<CacheStep>, Option<RecordingGuard>), StepError> {
        let guard = self.cache.begin_recording(fp);
        let mut transcript: Vec<TranscriptEntry> = Vec::new();
        let mut trace: Vec<CacheStep> = Vec::new();
        let mut replans_left = self.options.step_replans;

        for _turn in 0..self.options.max_planner_turns {
            let page_state = driver
                .snapshot()
                .await
                .map_err(|err| ExecutionError::Driver(err.to_string()))?;
            let request = PlanRequest {
                instruction: step.instruction.clone(),
                params: step.params.clone(),
                page_state,
                prior_steps: transcript.clone(),
                capabilities: self.options.capabilities,
            };

            let planned = self.plan_with_retry(&request).await?;
            match &planned.action {
                CacheAction::Text { message } => {
                    let judgment = Judgment::parse(message)?;
                    let result = judgment_result(&judgment);
                    trace.push(
                        CacheStep::new(planned.reasoning.clone(), Some(planned.action.clone()))
                            .with_result(result.evidence.clone()),
                    );
                    return Ok((result, trace, guard));
                }
                CacheAction::ToolUse { tool, .. } => {
                    if !self.options.capabilities.allows(*tool) {
                        return Err(PlannerError::DisallowedTool(tool.to_string()).into());
                    }
                    match self.execute_bounded(&planned.action, driver).await {
                        Ok(result) => {
                            transcript.push(TranscriptEntry {
                                reasoning: planned.reasoning.clone(),
                                action: Some(planned.action.clone()),
                                result: Some(result.evidence.clone()),
                            });
                            trace.push(
                                CacheStep::new(planned.reasoning.clone(), Some(planned.action.clone()))
                                    .with_result(result.evidence.clone()),
                            );
                        }
                        Err(err) => {
                            if replans_left == 0 {
                                return Err(err.into());
                            }
                            replans_left -= 1;
                            warn!(%err, "action failed; feeding failure back to planner");
                            transcript.push(TranscriptEntry {
                                reasoning: planned.reasoning.clone(),
                                action: Some(planned.action.clone()),
                                result: Some(format!("FAILED: {err}")),
                            });
                        }
                    }
                }
            }
        }

        Err(PlannerError::MalformedResponse(format!(
            "no terminal judgment within {} turn(s)",
            self.options.max_planner_turns
        ))
        .into())
    }

    /// Run one action with its own time budget. A wedged driver call
    /// surfaces as an executor timeout, which the caller may self-heal,
    /// instead of burning the whole-test budget.
    async fn execute_bounded(
        &self,
        action: &CacheAction,
        driver: &dyn Driver,
    ) -> Result<ExecutionResult, ExecutionError> {
        let budget = self.options.action_timeout;
        match tokio::time::timeout(budget, self.executor.execute(action, driver)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout {
                target: action_target(action),
                timeout_ms: budget.as_millis() as u64,
            }),
        }
    }

    async fn plan_with_retry(&self, request: &PlanRequest) -> Result<PlannedAction, StepError> {
        let timeout_ms = self.options.planner_timeout.as_millis() as u64;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome =
                tokio::time::timeout(self.options.planner_timeout, self.planner.plan(request))
                    .await;
            let err = match outcome {
                Ok(Ok(planned)) => return Ok(planned),
                Ok(Err(err)) => err,
                Err(_) => PlannerError::Timeout(timeout_ms),
            };
            if attempts > self.options.planner_retries {
                return Err(err.into());
            }
            warn!(%err, attempts, "planner call failed; retrying");
        }
    }
}

fn action_target(action: &CacheAction) -> String {
    match action {
        CacheAction::ToolUse { tool, .. } => tool.to_string(),
        CacheAction::Text { .. } => "judgment".to_string(),
    }
}

fn judgment_result(judgment: &Judgment) -> ExecutionResult {
    let reason = judgment.reason.clone().unwrap_or_default();
    if judgment.is_passed() {
        ExecutionResult::passed(reason)
    } else {
        ExecutionResult::failed(reason.clone(), reason)
    }
}

fn result_record(index: usize, step: &Step, result: ExecutionResult, cache_hit: bool) -> StepRecord {
    let status = if result.passed {
        StepStatus::Passed
    } else {
        StepStatus::Failed
    };
    step_record(
        index,
        step,
        status,
        result.evidence,
        result.failure_reason,
        cache_hit,
    )
}

fn step_record(
    index: usize,
    step: &Step,
    status: StepStatus,
    evidence: String,
    error: Option<String>,
    cache_hit: bool,
) -> StepRecord {
    StepRecord {
        index,
        kind: step.kind,
        instruction: step.instruction.clone(),
        status,
        evidence,
        error,
        cache_hit,
        timestamp: Utc::now().timestamp_millis(),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(limit).collect();
        out.push_str("...");
        out
    }
}
