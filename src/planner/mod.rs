//! Action planner contract and the deterministic mock provider.
//!
//! The planner is stateless per call: continuity comes only from the
//! transcript of prior reasoning/action/result tuples the orchestrator
//! threads back in.

pub mod anthropic;

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CacheAction, ToolName};
use crate::driver::PageState;
use crate::errors::PlannerError;

pub use anthropic::{AnthropicConfig, AnthropicPlanner};

/// Which tool classes this planner instance may emit. The mobile profile
/// has no hover cursor, so pointer-hover tools are disabled there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCapabilities {
    pub supports_hover: bool,
    pub supports_mouse_move: bool,
}

impl ToolCapabilities {
    pub fn desktop() -> Self {
        Self {
            supports_hover: true,
            supports_mouse_move: true,
        }
    }

    pub fn mobile() -> Self {
        Self {
            supports_hover: false,
            supports_mouse_move: false,
        }
    }

    pub fn allows(&self, tool: ToolName) -> bool {
        match tool {
            ToolName::Hover => self.supports_hover,
            ToolName::MouseMove => self.supports_mouse_move,
            _ => true,
        }
    }

    pub fn allowed_tools(&self) -> Vec<ToolName> {
        [
            ToolName::Navigate,
            ToolName::Click,
            ToolName::TypeText,
            ToolName::Scroll,
            ToolName::WaitFor,
            ToolName::ExtractText,
            ToolName::Hover,
            ToolName::MouseMove,
        ]
        .into_iter()
        .filter(|tool| self.allows(*tool))
        .collect()
    }
}

impl Default for ToolCapabilities {
    fn default() -> Self {
        Self::desktop()
    }
}

/// One prior planner turn, replayed to the model for continuity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub reasoning: String,
    pub action: Option<CacheAction>,
    pub result: Option<String>,
}

/// Everything a single planning call sees.
#[derive(Clone, Debug)]
pub struct PlanRequest {
    pub instruction: String,
    pub params: BTreeMap<String, Value>,
    pub page_state: PageState,
    pub prior_steps: Vec<TranscriptEntry>,
    pub capabilities: ToolCapabilities,
}

/// A planner turn: the model's reasoning plus exactly one action.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedAction {
    pub reasoning: String,
    pub action: CacheAction,
}

/// Terminal judgment the planner must emit to finish a step. Any other
/// shape in the terminal text is a contract violation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub status: JudgmentStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentStatus {
    Passed,
    Failed,
}

impl Judgment {
    pub fn passed(reason: impl Into<String>) -> Self {
        Self {
            status: JudgmentStatus::Passed,
            reason: Some(reason.into()),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: JudgmentStatus::Failed,
            reason: Some(reason.into()),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == JudgmentStatus::Passed
    }

    pub fn parse(message: &str) -> Result<Self, PlannerError> {
        serde_json::from_str(message).map_err(|err| {
            PlannerError::MalformedResponse(format!("terminal judgment is not valid: {err}"))
        })
    }

    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("judgment is always serializable")
    }
}

/// Stateless adapter to an AI model: one pending instruction in, one
/// tool-use action or terminal judgment out.
#[async_trait]
pub trait ActionPlanner: Send + Sync {
    async fn plan(&self, request: &PlanRequest) -> Result<PlannedAction, PlannerError>;
}

/// Deterministic planner for offline runs and tests. Consumes a scripted
/// queue of turns, each either a planned action or a provider error; once
/// the script is drained (or when constructed with [`MockPlanner::passing`])
/// every call returns a passing judgment.
#[derive(Default)]
pub struct MockPlanner {
    script: Mutex<VecDeque<Result<PlannedAction, PlannerError>>>,
    calls: AtomicUsize,
}

impl MockPlanner {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<PlannedAction>) -> Self {
        Self::with_outcomes(script.into_iter().map(Ok).collect())
    }

    /// Script both successful turns and provider-side failures.
    pub fn with_outcomes(outcomes: Vec<Result<PlannedAction, PlannerError>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of planning calls issued so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn tool_turn(reasoning: &str, tool: ToolName, input: Value) -> PlannedAction {
        PlannedAction {
            reasoning: reasoning.to_string(),
            action: CacheAction::ToolUse { tool, input },
        }
    }

    pub fn judgment_turn(reasoning: &str, judgment: Judgment) -> PlannedAction {
        PlannedAction {
            reasoning: reasoning.to_string(),
            action: CacheAction::Text {
                message: judgment.to_message(),
            },
        }
    }
}

#[async_trait]
impl ActionPlanner for MockPlanner {
    async fn plan(&self, request: &PlanRequest) -> Result<PlannedAction, PlannerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(turn) = self.script.lock().pop_front() {
            let turn = turn?;
            if let CacheAction::ToolUse { tool, .. } = &turn.action {
                if !request.capabilities.allows(*tool) {
                    return Err(PlannerError::DisallowedTool(tool.to_string()));
                }
            }
            return Ok(turn);
        }
        Ok(PlannedAction {
            reasoning: format!("instruction '{}' holds on current page", request.instruction),
            action: CacheAction::Text {
                message: Judgment::passed("mock planner default verdict").to_message(),
            },
        })
    }
}
