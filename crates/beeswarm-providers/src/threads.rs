//! Stateful thread/run protocol (assistants API).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use beeswarm_core::ToolCall;

/// Provider-side conversation container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Still executing on the provider side; keep polling.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::InProgress | Self::Cancelling)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed | Self::Completed | Self::Incomplete | Self::Expired
        )
    }
}

/// One execution of an assistant against a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RunError>,
}

impl Run {
    /// Tool calls the run is waiting on, in the order the model listed them.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        self.required_action
            .as_ref()
            .map(|a| {
                a.submit_tool_outputs
                    .tool_calls
                    .iter()
                    .map(|c| ToolCall {
                        id: c.id.clone(),
                        name: c.function.name.clone(),
                        arguments: c.function.arguments.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredAction {
    pub submit_tool_outputs: SubmitToolOutputs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitToolOutputs {
    #[serde(default)]
    pub tool_calls: Vec<RunToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunToolCall {
    pub id: String,
    pub function: RunFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Result of one tool call, submitted back to the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Messages on a thread, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageList {
    #[serde(default)]
    pub data: Vec<ThreadMessage>,
}

impl MessageList {
    /// Text of the newest message.
    pub fn latest_text(&self) -> Option<&str> {
        self.data.first().and_then(ThreadMessage::text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

impl ThreadMessage {
    /// First text part of the message.
    pub fn text(&self) -> Option<&str> {
        self.content
            .first()
            .and_then(|c| c.text.as_ref())
            .map(|t| t.value.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContent {
    pub value: String,
}

/// The thread/run protocol.
#[async_trait]
pub trait ThreadsApi: Send + Sync {
    async fn create_thread(&self) -> anyhow::Result<Thread>;

    async fn create_message(&self, thread_id: &str, role: &str, content: &str)
    -> anyhow::Result<()>;

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: Option<&str>,
    ) -> anyhow::Result<Run>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> anyhow::Result<Run>;

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> anyhow::Result<Run>;

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> anyhow::Result<Run>;

    async fn list_messages(&self, thread_id: &str) -> anyhow::Result<MessageList>;
}
