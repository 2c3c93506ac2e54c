//! LLM provider abstraction.
//!
//! [`ChatProvider`] covers one-shot and streamed chat completions;
//! [`threads::ThreadsApi`] covers the stateful thread/run protocol.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use beeswarm_core::Message;

pub mod openai;
pub mod sse;
pub mod threads;

/// A chat-completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default)]
    pub stream: bool,
}

/// A complete (non-streamed) chat completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl ChatCompletion {
    /// The first choice's message, if the provider sent one.
    pub fn first_message(&self) -> Option<&Value> {
        self.choices.first().and_then(|c| c.message.as_ref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One streamed chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl ChatChunk {
    /// Chunk carrying a single delta, as the provider would send it.
    pub fn delta(delta: Value) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta,
                finish_reason: None,
            }],
        }
    }
}

/// Tool description sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<ChatChunk>> + Send>>;

/// The core chat-completion provider trait.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider identifier (e.g., "openai").
    fn id(&self) -> &str;

    /// Format tool definitions for this provider's API.
    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    /// Format conversation history for this provider's API.
    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages.iter().map(Message::to_wire).collect()
    }

    /// Run a chat completion and return the whole response.
    async fn complete(&self, request: &ChatRequest) -> anyhow::Result<ChatCompletion>;

    /// Stream a chat completion as deltas.
    async fn stream(&self, request: &ChatRequest) -> anyhow::Result<ChunkStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_without_message() {
        let completion: ChatCompletion =
            serde_json::from_value(json!({"choices": [{"finish_reason": "stop"}]})).unwrap();
        assert!(completion.first_message().is_none());

        let completion: ChatCompletion = serde_json::from_value(json!({})).unwrap();
        assert!(completion.choices.is_empty());
    }

    #[test]
    fn test_request_skips_empty_fields() {
        let request = ChatRequest {
            model: "gpt-4o".into(),
            messages: vec![json!({"role": "user", "content": "hi"})],
            ..Default::default()
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("parallel_tool_calls").is_none());
        assert_eq!(value["stream"], false);
    }
}
