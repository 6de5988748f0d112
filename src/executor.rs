//! Maps planned actions onto concrete driver effects.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheAction, ToolName};
use crate::driver::{ClickTarget, Driver, DriverError, ScrollDirection};
use crate::errors::ExecutionError;
use crate::planner::Judgment;

/// Outcome of executing one action, with captured evidence.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub passed: bool,
    pub evidence: String,
    pub failure_reason: Option<String>,
}

impl ExecutionResult {
    pub fn passed(evidence: impl Into<String>) -> Self {
        Self {
            passed: true,
            evidence: evidence.into(),
            failure_reason: None,
        }
    }

    pub fn failed(evidence: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            evidence: evidence.into(),
            failure_reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NavigateInput {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ClickInput {
    selector: Option<String>,
    x: Option<f64>,
    y: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TypeTextInput {
    selector: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ScrollInput {
    direction: ScrollDirection,
}

#[derive(Debug, Deserialize)]
struct WaitForInput {
    selector: String,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SelectorInput {
    selector: String,
}

#[derive(Debug, Deserialize)]
struct MouseMoveInput {
    x: f64,
    y: f64,
}

/// Stateless executor; all side effects go through the driver handle.
#[derive(Clone, Debug)]
pub struct ActionExecutor {
    default_wait_timeout: Duration,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self {
            default_wait_timeout: Duration::from_secs(10),
        }
    }
}

impl ActionExecutor {
    pub fn new(default_wait_timeout: Duration) -> Self {
        Self {
            default_wait_timeout,
        }
    }

    /// Execute one action. A `text` action produces no external effect; the
    /// stored judgment is returned as the result directly.
    pub async fn execute(
        &self,
        action: &CacheAction,
        driver: &dyn Driver,
    ) -> Result<ExecutionResult, ExecutionError> {
        match action {
            CacheAction::Text { message } => {
                let judgment = Judgment::parse(message).map_err(|err| {
                    ExecutionError::InvalidAction {
                        tool: "text".into(),
                        detail: err.to_string(),
                    }
                })?;
                Ok(judgment_result(&judgment))
            }
            CacheAction::ToolUse { tool, input } => {
                debug!(tool = %tool, "executing tool action");
                self.execute_tool(*tool, input, driver).await
            }
        }
    }

    async fn execute_tool(
        &self,
        tool: ToolName,
        input: &Value,
        driver: &dyn Driver,
    ) -> Result<ExecutionResult, ExecutionError> {
        match tool {
            ToolName::Navigate => {
                let args: NavigateInput = parse_input(tool, input)?;
                driver
                    .navigate(&args.url)
                    .await
                    .map_err(|err| map_driver_error(err, &args.url))?;
                Ok(ExecutionResult::passed(format!("navigated to {}", args.url)))
            }
            ToolName::Click => {
                let args: ClickInput = parse_input(tool, input)?;
                let target = click_target(tool, args)?;
                let described = target.describe();
                driver
                    .click(&target)
                    .await
                    .map_err(|err| map_driver_error(err, &described))?;
                Ok(ExecutionResult::passed(format!("clicked {described}")))
            }
            ToolName::TypeText => {
                let args: TypeTextInput = parse_input(tool, input)?;
                driver
                    .type_text(&args.selector, &args.text)
                    .await
                    .map_err(|err| map_driver_error(err, &args.selector))?;
                Ok(ExecutionResult::passed(format!(
                    "typed {} char(s) into {}",
                    args.text.chars().count(),
                    args.selector
                )))
            }
            ToolName::Scroll => {
                let args: ScrollInput = parse_input(tool, input)?;
                driver
                    .scroll(args.direction)
                    .await
                    .map_err(|err| map_driver_error(err, "page"))?;
                Ok(ExecutionResult::passed(format!(
                    "scrolled {:?}",
                    args.direction
                )))
            }
            ToolName::WaitFor => {
                let args: WaitForInput = parse_input(tool, input)?;
                let timeout = args
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.default_wait_timeout);
                driver
                    .wait_for(&args.selector, timeout)
                    .await
                    .map_err(|err| map_driver_error(err, &args.selector))?;
                Ok(ExecutionResult::passed(format!(
                    "'{}' appeared",
                    args.selector
                )))
            }
            ToolName::ExtractText => {
                let args: SelectorInput = parse_input(tool, input)?;
                let text = driver
                    .extract_text(&args.selector)
                    .await
                    .map_err(|err| map_driver_error(err, &args.selector))?;
                Ok(ExecutionResult::passed(text))
            }
            ToolName::Hover => {
                let args: SelectorInput = parse_input(tool, input)?;
                driver
                    .hover(&args.selector)
                    .await
                    .map_err(|err| map_driver_error(err, &args.selector))?;
                Ok(ExecutionResult::passed(format!("hovered {}", args.selector)))
            }
            ToolName::MouseMove => {
                let args: MouseMoveInput = parse_input(tool, input)?;
                driver
                    .mouse_move(args.x, args.y)
                    .await
                    .map_err(|err| map_driver_error(err, "pointer"))?;
                Ok(ExecutionResult::passed(format!(
                    "moved pointer to ({}, {})",
                    args.x, args.y
                )))
            }
        }
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

fn click_target(tool: ToolName, args: ClickInput) -> Result<ClickTarget, ExecutionError> {
    match (args.selector, args.x, args.y) {
        (Some(selector), _, _) => Ok(ClickTarget::Selector(selector)),
        (None, Some(x), Some(y)) => Ok(ClickTarget::Coordinates { x, y }),
        _ => Err(ExecutionError::InvalidAction {
            tool: tool.to_string(),
            detail: "click needs a selector or both coordinates".into(),
        }),
    }
}

fn parse_input<T: for<'de> Deserialize<'de>>(
    tool: ToolName,
    input: &Value,
) -> Result<T, ExecutionError> {
    serde_json::from_value(input.clone()).map_err(|err| ExecutionError::InvalidAction {
        tool: tool.to_string(),
        detail: err.to_string(),
    })
}

fn map_driver_error(err: DriverError, target: &str) -> ExecutionError {
    match err {
        DriverError::NotFound(target) => ExecutionError::TargetNotFound { target },
        DriverError::Timeout { target, timeout_ms } => {
            ExecutionError::Timeout { target, timeout_ms }
        }
        DriverError::Network(detail) => {
            ExecutionError::Driver(format!("{detail} (target: {target})"))
        }
        DriverError::Crashed(detail) => ExecutionError::Driver(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{InMemoryDriver, PageSpec};
    use serde_json::json;
    use std::collections::HashMap;

    fn driver() -> InMemoryDriver {
        let mut pages = HashMap::new();
        pages.insert(
            "/".to_string(),
            PageSpec {
                title: "Home".into(),
                text: "hello world".into(),
                selectors: vec!["#cta".into()],
                on_click: HashMap::new(),
            },
        );
        InMemoryDriver::new(pages, "/")
    }

    #[tokio::test]
    async fn tool_actions_map_to_driver_effects() {
        let executor = ActionExecutor::default();
        let driver = driver();

        let result = executor
            .execute(
                &CacheAction::ToolUse {
                    tool: ToolName::ExtractText,
                    input: json!({ "selector": "#cta" }),
                },
                &driver,
            )
            .await
            .unwrap();
        assert!(result.passed);
        assert_eq!(result.evidence, "hello world");
    }

    #[tokio::test]
    async fn missing_target_surfaces_typed_error() {
        let executor = ActionExecutor::default();
        let driver = driver();

        let err = executor
            .execute(
                &CacheAction::ToolUse {
                    tool: ToolName::Click,
                    input: json!({ "selector": "#missing" }),
                },
                &driver,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::TargetNotFound { .. }));
    }

    #[tokio::test]
    async fn text_action_returns_stored_judgment_without_effect() {
        let executor = ActionExecutor::default();
        let driver = driver();

        let result = executor
            .execute(
                &CacheAction::Text {
                    message: Judgment::failed("button is missing").to_message(),
                },
                &driver,
            )
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.failure_reason.as_deref(), Some("button is missing"));
        assert_eq!(driver.current_url(), "/");
    }

    #[tokio::test]
    async fn mouse_move_moves_the_pointer_without_clicking() {
        let executor = ActionExecutor::default();
        let driver = driver();

        let result = executor
            .execute(
                &CacheAction::ToolUse {
                    tool: ToolName::MouseMove,
                    input: json!({ "x": 12.0, "y": 34.0 }),
                },
                &driver,
            )
            .await
            .unwrap();
        assert!(result.passed);
        assert_eq!(driver.pointer_position(), Some((12.0, 34.0)));
        assert_eq!(driver.current_url(), "/");
    }

    #[tokio::test]
    async fn malformed_click_payload_is_invalid_action() {
        let executor = ActionExecutor::default();
        let driver = driver();

        let err = executor
            .execute(
                &CacheAction::ToolUse {
                    tool: ToolName::Click,
                    input: json!({ "x": 10.0 }),
                },
                &driver,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidAction { .. }));
    }
}
