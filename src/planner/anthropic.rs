//! HTTP adapter for an Anthropic-style messages API with tool use.
//!
//! The provider contract is narrow: we send the pending instruction, its
//! normalized parameters, a serialized page snapshot, the prior transcript,
//! and the allowed tool set; the model must answer with exactly one
//! `tool_use` block naming an allowed tool, or one `text` block carrying a
//! terminal judgment. Anything else is a contract violation.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ActionPlanner, PlanRequest, PlannedAction, ToolCapabilities};
use crate::cache::{CacheAction, ToolName};
use crate::errors::PlannerError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_base: "https://api.anthropic.com/v1".to_string(),
            max_tokens: 1024,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct AnthropicPlanner {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicPlanner {
    pub fn new(config: AnthropicConfig) -> Result<Self, PlannerError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| PlannerError::Unreachable(format!("http client: {err}")))?;
        Ok(Self { client, config })
    }

    fn system_prompt(capabilities: &ToolCapabilities) -> String {
        let tools = capabilities
            .allowed_tools()
            .iter()
            .map(ToolName::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "You are executing one step of a browser test. Use exactly one of \
             the provided tools ({tools}) to make progress, or, when the \
             instruction can be judged from the current page state alone, \
             reply with a single text block containing JSON of the form \
             {{\"status\": \"passed\"|\"failed\", \"reason\": \"...\"}}."
        )
    }

    fn user_message(request: &PlanRequest) -> String {
        let transcript: Vec<Value> = request
            .prior_steps
            .iter()
            .map(|entry| {
                json!({
                    "reasoning": entry.reasoning,
                    "action": entry.action,
                    "result": entry.result,
                })
            })
            .collect();
        json!({
            "instruction": request.instruction,
            "params": request.params,
            "page": {
                "url": request.page_state.url,
                "title": request.page_state.title,
                "visible_text": request.page_state.visible_text,
            },
            "transcript": transcript,
        })
        .to_string()
    }

    fn tool_definitions(capabilities: &ToolCapabilities) -> Vec<Value> {
        TOOL_CATALOG
            .iter()
            .filter(|(tool, _)| capabilities.allows(*tool))
            .map(|(_, definition)| definition.clone())
            .collect()
    }
}

/// Full tool catalog; capability filtering happens per request.
static TOOL_CATALOG: Lazy<Vec<(ToolName, Value)>> = Lazy::new(|| {
    ToolCapabilities::desktop()
        .allowed_tools()
        .into_iter()
        .map(|tool| {
            let definition = json!({
                "name": tool.as_str(),
                "description": tool_description(tool),
                "input_schema": tool_schema(tool),
            });
            (tool, definition)
        })
        .collect()
});

fn tool_description(tool: ToolName) -> &'static str {
    match tool {
        ToolName::Navigate => "Navigate the page to a URL",
        ToolName::Click => "Click an element by selector or coordinates",
        ToolName::TypeText => "Type text into an element",
        ToolName::Scroll => "Scroll the page",
        ToolName::WaitFor => "Wait until a selector appears",
        ToolName::ExtractText => "Extract visible text from an element",
        ToolName::Hover => "Hover the pointer over an element",
        ToolName::MouseMove => "Move the pointer to coordinates",
    }
}

fn tool_schema(tool: ToolName) -> Value {
    match tool {
        ToolName::Navigate => json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"]
        }),
        ToolName::Click => json!({
            "type": "object",
            "properties": {
                "selector": { "type": "string" },
                "x": { "type": "number" },
                "y": { "type": "number" }
            }
        }),
        ToolName::TypeText => json!({
            "type": "object",
            "properties": {
                "selector": { "type": "string" },
                "text": { "type": "string" }
            },
            "required": ["selector", "text"]
        }),
        ToolName::Scroll => json!({
            "type": "object",
            "properties": {
                "direction": { "type": "string", "enum": ["up", "down", "top", "bottom"] }
            },
            "required": ["direction"]
        }),
        ToolName::WaitFor => json!({
            "type": "object",
            "properties": {
                "selector": { "type": "string" },
                "timeout_ms": { "type": "integer" }
            },
            "required": ["selector"]
        }),
        ToolName::ExtractText | ToolName::Hover => json!({
            "type": "object",
            "properties": { "selector": { "type": "string" } },
            "required": ["selector"]
        }),
        ToolName::MouseMove => json!({
            "type": "object",
            "properties": {
                "x": { "type": "number" },
                "y": { "type": "number" }
            },
            "required": ["x", "y"]
        }),
    }
}

#[async_trait]
impl ActionPlanner for AnthropicPlanner {
    async fn plan(&self, request: &PlanRequest) -> Result<PlannedAction, PlannerError> {
        let body = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: Self::system_prompt(&request.capabilities),
            tools: Self::tool_definitions(&request.capabilities),
            messages: vec![Message {
                role: "user".to_string(),
                content: Self::user_message(request),
            }],
        };

        let url = format!("{}/messages", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    PlannerError::Timeout(self.config.timeout.as_millis() as u64)
                } else {
                    PlannerError::Unreachable(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(PlannerError::Provider { status, detail });
        }

        let payload: MessagesResponse = response
            .json()
            .await
            .map_err(|err| PlannerError::MalformedResponse(err.to_string()))?;

        parse_planned_action(payload, &request.capabilities)
    }
}

fn parse_planned_action(
    payload: MessagesResponse,
    capabilities: &ToolCapabilities,
) -> Result<PlannedAction, PlannerError> {
    let mut reasoning = Vec::new();
    let mut action: Option<CacheAction> = None;

    for block in payload.content {
        match block {
            ContentBlock::ToolUse { name, input } => {
                if action.is_some() {
                    return Err(PlannerError::MalformedResponse(
                        "response carries more than one action block".into(),
                    ));
                }
                let tool = ToolName::parse(&name)
                    .ok_or_else(|| PlannerError::MalformedResponse(format!("unknown tool '{name}'")))?;
                if !capabilities.allows(tool) {
                    return Err(PlannerError::DisallowedTool(name));
                }
                action = Some(CacheAction::ToolUse { tool, input });
            }
            ContentBlock::Text { text } => {
                if action.is_none() && looks_like_judgment(&text) {
                    action = Some(CacheAction::Text { message: text });
                } else {
                    reasoning.push(text);
                }
            }
        }
    }

    let action = action.ok_or_else(|| {
        PlannerError::MalformedResponse("response carries neither tool_use nor judgment".into())
    })?;

    Ok(PlannedAction {
        reasoning: reasoning.join("\n"),
        action,
    })
}

fn looks_like_judgment(text: &str) -> bool {
    super::Judgment::parse(text.trim()).is_ok()
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    tools: Vec<Value>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    ToolUse { name: String, input: Value },
}
