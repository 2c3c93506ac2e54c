//! Conversation messages and their provider wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Result, SwarmError, TransferError};

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
            Role::Tool => "tool",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "function" => Some(Role::Function),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string as produced by the model.
    #[serde(default)]
    pub arguments: String,
}

/// A tool use recorded in conversation history: function name plus parsed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// One entry of a conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolInvocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            sender: None,
            task_id: None,
            tool: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            refusal: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Tool-role reply to a specific tool call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_tool(mut self, invocation: ToolInvocation) -> Self {
        self.tool = Some(invocation);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Convert to the chat-completion wire format.
    pub fn to_wire(&self) -> Value {
        let tool_calls: Vec<Value> = if !self.tool_calls.is_empty() {
            self.tool_calls.iter().map(tool_call_to_wire).collect()
        } else if let Some(tool) = &self.tool {
            let call = ToolCall {
                id: synthetic_call_id(),
                name: tool.name.clone(),
                arguments: Value::Object(tool.args.clone()).to_string(),
            };
            vec![tool_call_to_wire(&call)]
        } else {
            Vec::new()
        };

        if !tool_calls.is_empty() {
            let content = if self.content.is_empty() {
                Value::Null
            } else {
                json!(self.content)
            };
            return json!({
                "role": "assistant",
                "content": content,
                "tool_calls": tool_calls,
            });
        }

        match self.role {
            Role::Function => json!({
                "role": "function",
                "content": self.content,
                "name": self.sender.as_deref().unwrap_or("unknown"),
            }),
            Role::Tool => json!({
                "role": "tool",
                "content": self.content,
                "tool_call_id": self.tool_call_id.as_deref().unwrap_or("unknown"),
            }),
            role => {
                let mut msg = json!({ "role": role.as_str(), "content": self.content });
                // The provider only accepts `[A-Za-z0-9_-]` in `name`.
                if let Some(sender) = self.sender.as_deref().filter(|s| is_wire_name(s)) {
                    msg["name"] = json!(sender);
                }
                msg
            }
        }
    }

    /// Parse a chat-completion wire message.
    pub fn from_wire(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            SwarmError::MalformedResponse(format!("message is not an object: {value}"))
        })?;

        let role_str = obj.get("role").and_then(Value::as_str).unwrap_or("assistant");
        let role = Role::parse(role_str).ok_or_else(|| {
            SwarmError::MalformedResponse(format!("unknown message role: {role_str}"))
        })?;
        if role == Role::Function {
            return Err(TransferError::Message("function messages are not supported".into()).into());
        }

        let mut tool_calls = Vec::new();
        if let Some(calls) = obj.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                tool_calls.push(tool_call_from_wire(call)?);
            }
        }

        let tool = tool_calls.first().map(|call| ToolInvocation {
            name: call.name.clone(),
            args: parse_arguments(&call.arguments).unwrap_or_default(),
        });

        let sender = obj
            .get("sender")
            .or_else(|| obj.get("name"))
            .and_then(Value::as_str)
            .map(String::from);

        Ok(Self {
            role,
            content: obj
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            sender,
            task_id: None,
            tool,
            tool_calls,
            tool_call_id: obj
                .get("tool_call_id")
                .and_then(Value::as_str)
                .map(String::from),
            refusal: obj.get("refusal").and_then(Value::as_str).map(String::from),
        })
    }
}

/// Parse a tool-call argument string. An empty string means no arguments.
pub fn parse_arguments(raw: &str) -> Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(SwarmError::Tool(format!(
            "tool arguments must be a JSON object, got: {other}"
        ))),
    }
}

fn tool_call_to_wire(call: &ToolCall) -> Value {
    json!({
        "id": call.id,
        "type": "function",
        "function": {
            "name": call.name,
            "arguments": call.arguments,
        }
    })
}

fn tool_call_from_wire(value: &Value) -> Result<ToolCall> {
    let function = value.get("function").ok_or_else(|| {
        SwarmError::MalformedResponse(format!("tool call without function: {value}"))
    })?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| SwarmError::MalformedResponse(format!("tool call without name: {value}")))?;

    Ok(ToolCall {
        id: value
            .get("id")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(synthetic_call_id),
        name: name.to_string(),
        arguments: function
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn synthetic_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn is_wire_name(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
