use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Model and sampling settings used to build upstream requests.
///
/// Loaded once per process and shared read-only; the only field a request may
/// override is `temperature`, via [`ChatConfig::with_temperature`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub model: String,
    pub system_prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    /// Only sent to reasoning models
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            presence_penalty: None,
            frequency_penalty: None,
            reasoning_effort: None,
        }
    }
}

impl ChatConfig {
    /// Copy of this config with the temperature replaced, if one was given.
    pub fn with_temperature(&self, temperature: Option<f32>) -> ChatConfig {
        let mut cfg = self.clone();
        if let Some(t) = temperature {
            cfg.temperature = Some(t);
        }
        cfg
    }
}
