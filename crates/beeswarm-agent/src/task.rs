//! Units of work routed through the thread engine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use beeswarm_core::{Result, SwarmError};

/// Assistant name that asks the engine to triage the task.
pub const AUTO_ASSISTANT: &str = "auto";

pub const DEFAULT_ASSISTANT: &str = "user_interface";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    /// An assistant name, or [`AUTO_ASSISTANT`].
    pub assistant: String,
    pub iterate: bool,
    pub evaluate: bool,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            assistant: DEFAULT_ASSISTANT.to_string(),
            iterate: false,
            evaluate: false,
        }
    }

    pub fn with_assistant(mut self, assistant: impl Into<String>) -> Self {
        self.assistant = assistant.into();
        self
    }

    pub fn needs_triage(&self) -> bool {
        self.assistant == AUTO_ASSISTANT
    }
}

/// A task with the answer and routing it is expected to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationTask {
    #[serde(flatten)]
    pub task: Task,
    pub groundtruth: String,
    pub expected_assistant: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_plan: Option<String>,
}

/// One line of a task file.
#[derive(Debug, Deserialize)]
struct TaskLine {
    text: String,
    #[serde(default)]
    assistant: Option<String>,
    #[serde(default)]
    groundtruth: String,
    #[serde(default)]
    expected_assistant: String,
    #[serde(default)]
    expected_plan: Option<String>,
}

impl TaskLine {
    fn task(&self) -> Task {
        let assistant = self
            .assistant
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(AUTO_ASSISTANT);
        Task::new(self.text.clone()).with_assistant(assistant)
    }
}

async fn read_lines(path: &Path) -> Result<Vec<TaskLine>> {
    let raw = tokio::fs::read_to_string(path).await?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| {
                SwarmError::Config(format!("{}:{}: invalid task: {e}", path.display(), n + 1))
            })
        })
        .collect()
}

/// Read a JSONL task file (`{"text": …, "assistant"?: …}` per line).
/// Tasks without an assistant are triaged.
pub async fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    Ok(read_lines(path)
        .await?
        .into_iter()
        .map(|line| line.task())
        .collect())
}

/// Read a JSONL evaluation file
/// (`{"text", "assistant"?, "groundtruth", "expected_assistant"}` per line).
pub async fn load_test_tasks(path: &Path) -> Result<Vec<EvaluationTask>> {
    Ok(read_lines(path)
        .await?
        .into_iter()
        .map(|line| {
            let mut task = line.task();
            task.evaluate = true;
            EvaluationTask {
                task,
                groundtruth: line.groundtruth,
                expected_assistant: line.expected_assistant,
                expected_plan: line.expected_plan,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let a = Task::new("write a haiku");
        let b = Task::new("write a haiku");
        assert_ne!(a.id, b.id);
        assert_eq!(a.assistant, "user_interface");
        assert!(!a.iterate && !a.evaluate);
        assert!(!a.needs_triage());
        assert!(a.with_assistant("auto").needs_triage());
    }

    #[tokio::test]
    async fn test_load_test_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tests.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"text": "What is 2+2?", "groundtruth": "4", "expected_assistant": "math"}"#,
                "\n\n",
                r#"{"text": "Write a poem", "assistant": "writer", "groundtruth": "a poem", "expected_assistant": "writer"}"#,
                "\n",
            ),
        )
        .unwrap();

        let tasks = load_test_tasks(&path).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].task.description, "What is 2+2?");
        assert_eq!(tasks[0].task.assistant, "auto");
        assert!(tasks[0].task.evaluate);
        assert!(!tasks[0].task.iterate);
        assert_eq!(tasks[0].groundtruth, "4");
        assert_eq!(tasks[1].task.assistant, "writer");
        assert_eq!(tasks[1].expected_assistant, "writer");
    }

    #[tokio::test]
    async fn test_load_tasks_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        std::fs::write(&path, "{\"text\": \"ok\"}\nnot json\n").unwrap();

        let err = load_tasks(&path).await.unwrap_err();
        assert!(err.to_string().contains("tasks.jsonl:2: invalid task"));
    }
}
