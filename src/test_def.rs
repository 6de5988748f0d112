//! Declarative test definitions and the fluent authoring builder.
//!
//! `given`/`when`/`expect` each append one step and hand back the same
//! builder, so declaration order is execution order. `build()` freezes the
//! accumulated steps into an immutable [`TestDefinition`]; nothing can be
//! mutated once a run has started.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api_runner::ApiProbe;

/// Lifecycle hook: an async closure owned by the suite.
pub type HookFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
pub type Hook = Arc<dyn Fn() -> HookFuture + Send + Sync>;

/// Wrap an async closure as a lifecycle hook.
pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Given,
    When,
    Expect,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepKind::Given => "given",
            StepKind::When => "when",
            StepKind::Expect => "expect",
        };
        f.write_str(label)
    }
}

/// One assertion step: free-text instruction plus optional structured
/// parameters, URL override, and HTTP probe payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub kind: StepKind,
    pub instruction: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api: Option<ApiProbe>,
}

impl Step {
    fn new(kind: StepKind, instruction: impl Into<String>) -> Self {
        Self {
            kind,
            instruction: instruction.into(),
            params: BTreeMap::new(),
            url: None,
            api: None,
        }
    }
}

/// Immutable test definition; owned exclusively by the orchestrator while
/// it runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestDefinition {
    pub name: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub context: Option<Value>,
}

/// Fluent accumulator for a test definition.
#[derive(Clone, Debug)]
pub struct TestBuilder {
    name: String,
    steps: Vec<Step>,
    context: Option<Value>,
}

impl TestBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            context: None,
        }
    }

    pub fn given(mut self, instruction: impl Into<String>) -> Self {
        self.steps.push(Step::new(StepKind::Given, instruction));
        self
    }

    pub fn given_at(mut self, instruction: impl Into<String>, url: impl Into<String>) -> Self {
        let mut step = Step::new(StepKind::Given, instruction);
        step.url = Some(url.into());
        self.steps.push(step);
        self
    }

    pub fn when(mut self, instruction: impl Into<String>) -> Self {
        self.steps.push(Step::new(StepKind::When, instruction));
        self
    }

    pub fn when_with(
        mut self,
        instruction: impl Into<String>,
        params: BTreeMap<String, Value>,
    ) -> Self {
        let mut step = Step::new(StepKind::When, instruction);
        step.params = params;
        self.steps.push(step);
        self
    }

    pub fn expect(mut self, instruction: impl Into<String>) -> Self {
        self.steps.push(Step::new(StepKind::Expect, instruction));
        self
    }

    pub fn expect_at(mut self, instruction: impl Into<String>, url: impl Into<String>) -> Self {
        let mut step = Step::new(StepKind::Expect, instruction);
        step.url = Some(url.into());
        self.steps.push(step);
        self
    }

    pub fn expect_api(mut self, instruction: impl Into<String>, probe: ApiProbe) -> Self {
        let mut step = Step::new(StepKind::Expect, instruction);
        step.api = Some(probe);
        self.steps.push(step);
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn build(self) -> TestDefinition {
        TestDefinition {
            name: self.name,
            steps: self.steps,
            context: self.context,
        }
    }
}

/// A group of tests sharing lifecycle hooks. `before_all` runs once before
/// the first test, `before_each` once per test before its first step,
/// `after_all` once after the last test.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSuite {
    pub name: String,
    pub tests: Vec<TestDefinition>,
    #[serde(skip)]
    pub before_all: Option<Hook>,
    #[serde(skip)]
    pub after_all: Option<Hook>,
    #[serde(skip)]
    pub before_each: Option<Hook>,
}

impl fmt::Debug for TestSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSuite")
            .field("name", &self.name)
            .field("tests", &self.tests.len())
            .field("before_all", &self.before_all.is_some())
            .field("after_all", &self.after_all.is_some())
            .field("before_each", &self.before_each.is_some())
            .finish()
    }
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
            before_all: None,
            after_all: None,
            before_each: None,
        }
    }

    pub fn with_test(mut self, test: TestDefinition) -> Self {
        self.tests.push(test);
        self
    }

    pub fn with_before_all(mut self, hook: Hook) -> Self {
        self.before_all = Some(hook);
        self
    }

    pub fn with_after_all(mut self, hook: Hook) -> Self {
        self.after_all = Some(hook);
        self
    }

    pub fn with_before_each(mut self, hook: Hook) -> Self {
        self.before_each = Some(hook);
        self
    }

    /// Parse a suite from its YAML file representation. Hooks are a
    /// programmatic surface and never appear in files.
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }
}
