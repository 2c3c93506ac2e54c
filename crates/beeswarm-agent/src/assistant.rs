//! Provider-hosted assistants and their local conversation history.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};

use beeswarm_core::transcript::TranscriptLog;
use beeswarm_core::{AgentFunction, Message, Result, Role, ToolInvocation};

/// Task id used for history entries recorded outside any task.
pub const DEFAULT_TASK_ID: &str = "default";

/// An assistant known to the thread engine by name, backed by a provider-side
/// assistant id, with the functions it may call and its own history.
#[derive(Clone)]
pub struct Assistant {
    pub name: String,
    pub assistant_id: String,
    pub instructions: Option<String>,
    functions: Vec<Arc<dyn AgentFunction>>,
    history: Vec<Message>,
    current_task_id: Option<String>,
    log_flag: bool,
}

impl Assistant {
    pub fn new(name: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assistant_id: assistant_id.into(),
            instructions: None,
            functions: Vec::new(),
            history: Vec::new(),
            current_task_id: None,
            log_flag: false,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_function(mut self, function: Arc<dyn AgentFunction>) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_functions(
        mut self,
        functions: impl IntoIterator<Item = Arc<dyn AgentFunction>>,
    ) -> Self {
        self.functions.extend(functions);
        self
    }

    /// Persist this assistant's history after every task.
    pub fn with_log_flag(mut self, log_flag: bool) -> Self {
        self.log_flag = log_flag;
        self
    }

    pub fn functions(&self) -> &[Arc<dyn AgentFunction>] {
        &self.functions
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn log_flag(&self) -> bool {
        self.log_flag
    }

    pub fn current_task_id(&self) -> Option<&str> {
        self.current_task_id.as_deref()
    }

    pub fn set_current_task_id(&mut self, task_id: impl Into<String>) {
        self.current_task_id = Some(task_id.into());
    }

    /// Clear history. The current task id is kept.
    pub fn initialize_history(&mut self) {
        self.history.clear();
    }

    fn record(&mut self, message: Message) {
        let message = match &self.current_task_id {
            Some(id) => message.with_task_id(id.clone()),
            None => message,
        };
        self.history.push(message);
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.record(Message::user(content));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.record(Message::assistant(content).with_sender(self.name.clone()));
    }

    /// Append messages carried over from another assistant, stamped with the current task.
    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.record(message);
        }
    }

    /// Record a tool use as a user message carrying the invocation.
    pub fn add_tool_message(&mut self, name: impl Into<String>, args: Map<String, Value>) {
        let invocation = ToolInvocation {
            name: name.into(),
            args,
        };
        self.record(Message::user(format!("Tool used: {}", invocation.name)).with_tool(invocation));
    }

    /// Replace `target`'s history with a copy of this one.
    pub fn pass_context(&self, target: &mut Assistant) {
        target.history = self.history.clone();
    }

    /// History grouped by task id in first-seen order.
    pub fn conversation_by_task(&self) -> Vec<(String, Vec<&Message>)> {
        let mut groups: Vec<(String, Vec<&Message>)> = Vec::new();
        for message in &self.history {
            let task_id = message.task_id.as_deref().unwrap_or(DEFAULT_TASK_ID);
            match groups.iter_mut().find(|(id, _)| id == task_id) {
                Some((_, messages)) => messages.push(message),
                None => groups.push((task_id.to_string(), vec![message])),
            }
        }
        groups
    }

    /// Plain-text rendering of the history, one block per task.
    pub fn render_conversation(&self) -> String {
        let mut out = format!("Conversation with Assistant: {}\n", self.name);
        for (task_id, messages) in self.conversation_by_task() {
            let _ = writeln!(out, "\nTask ID: {task_id}");
            for message in messages {
                if let Some(tool) = &message.tool {
                    let args = tool
                        .args
                        .iter()
                        .map(|(k, v)| match v {
                            Value::String(s) => format!("{k}: {s}"),
                            other => format!("{k}: {other}"),
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    let _ = writeln!(out, "Tool: {}({args})", tool.name);
                    continue;
                }
                match message.role {
                    Role::User => {
                        let _ = writeln!(out, "User: {}", message.content);
                    }
                    Role::Assistant => {
                        let _ = writeln!(out, "Assistant: {}", message.content);
                    }
                    _ => {}
                }
            }
        }
        out
    }

    /// Write the history to a fresh timestamped transcript file.
    pub async fn save_conversation(&self, log: &TranscriptLog) -> Result<PathBuf> {
        let path = log.session_path();
        log.append_batch(&path, &self.history).await?;
        Ok(path)
    }
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("name", &self.name)
            .field("assistant_id", &self.assistant_id)
            .field("functions", &self.functions.len())
            .field("history", &self.history.len())
            .field("current_task_id", &self.current_task_id)
            .finish()
    }
}
