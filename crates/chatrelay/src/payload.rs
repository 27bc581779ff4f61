//! Builds the exact request body sent to the upstream Responses API.
//!
//! A payload is assembled from a closed set of shapes rather than grown field
//! by field: the turn input is either a fresh user turn or a tool-output reply,
//! and the model controls are either reasoning or sampling controls.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::chat::{FunctionTool, Role, ToolOutput};
use crate::config::ChatConfig;
use crate::store::ConversationStore;

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 800;

static REASONING_MODEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(o\d|gpt-5)").expect("reasoning model pattern is valid")
});

/// Reasoning models take an effort level instead of sampling knobs.
pub fn is_reasoning_model(model: &str) -> bool {
    REASONING_MODEL.is_match(model)
}

/// One entry of the upstream `input` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum InputItem {
    #[serde(rename = "message")]
    Message { role: Role, content: String },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

impl InputItem {
    fn message(role: Role, content: &str) -> Self {
        InputItem::Message {
            role,
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningControl {
    pub effort: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SamplingControls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
}

/// Model-specific knobs. Exactly one family is ever attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModelControls {
    Reasoning {
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning: Option<ReasoningControl>,
    },
    Sampling(SamplingControls),
}

impl ModelControls {
    pub fn for_config(config: &ChatConfig) -> Self {
        if is_reasoning_model(&config.model) {
            ModelControls::Reasoning {
                reasoning: config
                    .reasoning_effort
                    .as_ref()
                    .map(|effort| ReasoningControl {
                        effort: effort.clone(),
                    }),
            }
        } else {
            ModelControls::Sampling(SamplingControls {
                temperature: config.temperature,
                top_p: config.top_p,
                presence_penalty: config.presence_penalty,
                frequency_penalty: config.frequency_penalty,
            })
        }
    }
}

/// Request body for `POST /responses`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: Vec<InputItem>,
    pub max_output_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<FunctionTool>>,
    #[serde(flatten)]
    pub controls: ModelControls,
}

impl ResponsesRequest {
    /// Retry payload for a conversation stuck on an unanswered function call:
    /// same request, no continuation token, system prompt appended.
    pub fn recovery(&self, system_prompt: &str) -> ResponsesRequest {
        let mut retry = self.clone();
        retry.previous_response_id = None;
        retry
            .input
            .push(InputItem::message(Role::System, system_prompt));
        retry
    }
}

/// What the caller is sending this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnInput {
    /// A new user prompt
    Prompt(String),
    /// Answers to function calls the model issued on the previous turn
    ToolOutputs(Vec<ToolOutput>),
}

/// Everything one chat turn needs besides config and stored state.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// The prompt text as sent by the client. Kept even for tool replies since
    /// the request contract requires it.
    pub prompt: String,
    pub input: TurnInput,
    pub tools: Option<Vec<FunctionTool>>,
    pub stream: bool,
}

impl Turn {
    pub fn new(
        prompt: impl Into<String>,
        tools: Option<Vec<FunctionTool>>,
        tool_outputs: Option<Vec<ToolOutput>>,
        stream: bool,
    ) -> Self {
        let prompt = prompt.into();
        let input = match tool_outputs {
            Some(outputs) if !outputs.is_empty() => TurnInput::ToolOutputs(outputs),
            _ => TurnInput::Prompt(prompt.clone()),
        };
        Self {
            prompt,
            input,
            tools,
            stream,
        }
    }

    /// Tool replies are sent upstream but never reach the transcript store.
    pub fn is_tool_reply(&self) -> bool {
        matches!(self.input, TurnInput::ToolOutputs(_))
    }
}

/// Composes the upstream request for `turn` given the user's current token.
pub fn build_request(
    turn: &Turn,
    continuation_token: Option<String>,
    config: &ChatConfig,
) -> ResponsesRequest {
    let input = match &turn.input {
        TurnInput::ToolOutputs(outputs) => outputs
            .iter()
            .map(|o| InputItem::FunctionCallOutput {
                call_id: o.call_id.clone(),
                output: o.output.clone(),
            })
            .collect(),
        TurnInput::Prompt(prompt) => {
            let mut items = Vec::with_capacity(2);
            if continuation_token.is_none() {
                items.push(InputItem::message(Role::System, &config.system_prompt));
            }
            items.push(InputItem::message(Role::User, prompt));
            items
        }
    };

    ResponsesRequest {
        model: config.model.clone(),
        input,
        max_output_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
        stream: turn.stream,
        previous_response_id: continuation_token,
        tools: turn.tools.clone(),
        controls: ModelControls::for_config(config),
    }
}

/// Reads the user's continuation token from `store` and builds the request.
pub fn build_for_user(
    store: &dyn ConversationStore,
    user_id: &str,
    turn: &Turn,
    config: &ChatConfig,
) -> ResponsesRequest {
    build_request(turn, store.get_continuation_token(user_id), config)
}
