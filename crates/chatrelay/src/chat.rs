//! Conversation and wire types shared by the store, the payload builder and the
//! HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Role of a participant in a stored conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The system prompt that opens every conversation
    System,
    /// The human participant
    User,
    /// The model
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a stored conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A function the model may ask the caller to run.
///
/// Passed through to the upstream unchanged, so the field names follow the
/// Responses API tool format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    /// Always `"function"`
    #[serde(rename = "type", default = "FunctionTool::default_type")]
    pub tool_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the function arguments
    #[serde(default)]
    pub parameters: Value,
}

impl FunctionTool {
    fn default_type() -> String {
        "function".to_string()
    }
}

/// The caller's answer to a pending function call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub call_id: String,
    pub output: String,
}

/// Which side of the conversation a transcript line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent to the model (system and user turns)
    In,
    /// Produced by the model
    Out,
}

/// Human-facing view of one stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub text: String,
    pub direction: Direction,
}

impl From<&Message> for TranscriptEntry {
    fn from(msg: &Message) -> Self {
        let direction = match msg.role {
            Role::Assistant => Direction::Out,
            Role::System | Role::User => Direction::In,
        };
        TranscriptEntry {
            text: msg.content.clone(),
            direction,
        }
    }
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: Option<bool>,
    /// Identity token carried in the body; takes precedence over the `t` query parameter.
    #[serde(default)]
    pub supabase_jwt: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<FunctionTool>>,
    #[serde(default)]
    pub tool_outputs: Option<Vec<ToolOutput>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyMetadata {
    /// ISO-8601 timestamp of when the reply was produced
    pub timestamp: String,
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Buffered response body. Failures use the same shape so clients can rely on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub output_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<Value>>,
    pub metadata: ReplyMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ChatReply {
    pub fn success(output_text: String, output: Vec<Value>, id: Option<String>) -> Self {
        Self {
            output_text,
            output: Some(output),
            metadata: ReplyMetadata {
                timestamp: now_iso8601(),
                status: ReplyStatus::Success,
                error: None,
            },
            id,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            output_text: String::new(),
            output: None,
            metadata: ReplyMetadata {
                timestamp: now_iso8601(),
                status: ReplyStatus::Error,
                error: Some(error.into()),
            },
            id: None,
        }
    }
}

/// One `{ "response": <text> }` fragment written to a streaming client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFragment {
    pub response: String,
}

fn now_iso8601() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transcript_direction_follows_role() {
        let entries: Vec<TranscriptEntry> = [
            Message::system("be nice"),
            Message::user("hi"),
            Message::assistant("hello"),
        ]
        .iter()
        .map(TranscriptEntry::from)
        .collect();

        assert_eq!(entries[0].direction, Direction::In);
        assert_eq!(entries[1].direction, Direction::In);
        assert_eq!(entries[2].direction, Direction::Out);
        assert_eq!(
            serde_json::to_value(&entries[2]).unwrap(),
            json!({"text": "hello", "direction": "out"})
        );
    }

    #[test]
    fn chat_request_accepts_tools_and_outputs() {
        let req: ChatRequest = serde_json::from_value(json!({
            "text": "weather?",
            "stream": false,
            "tools": [{
                "type": "function",
                "name": "get_weather",
                "parameters": {"type": "object", "properties": {}}
            }],
            "tool_outputs": [{"call_id": "call_1", "output": "sunny"}]
        }))
        .unwrap();

        assert_eq!(req.text.as_deref(), Some("weather?"));
        let tools = req.tools.unwrap();
        assert_eq!(tools[0].name, "get_weather");
        assert_eq!(tools[0].description, None);
        assert_eq!(req.tool_outputs.unwrap()[0].call_id, "call_1");
    }

    #[test]
    fn failure_reply_keeps_success_shape() {
        let body = serde_json::to_value(ChatReply::failure("upstream down")).unwrap();
        assert_eq!(body["output_text"], "");
        assert_eq!(body["metadata"]["status"], "error");
        assert_eq!(body["metadata"]["error"], "upstream down");
        assert!(body["metadata"]["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(body.get("id").is_none());
    }
}
