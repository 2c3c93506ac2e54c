//! Scripted provider fakes shared by the engine tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use beeswarm_providers::threads::{MessageList, Run, Thread, ThreadsApi, ToolOutput};
use beeswarm_providers::{ChatChunk, ChatCompletion, ChatProvider, ChatRequest, Choice, ChunkStream};

/// Plays back canned completions and streams, recording every request.
#[derive(Default)]
pub struct ScriptedProvider {
    completions: Mutex<VecDeque<Option<Value>>>,
    streams: Mutex<VecDeque<Vec<ChatChunk>>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an assistant message. `None` queues a completion without choices.
    pub fn reply(self, message: Option<Value>) -> Self {
        self.completions.lock().unwrap().push_back(message);
        self
    }

    pub fn text(self, content: &str) -> Self {
        self.reply(Some(json!({"role": "assistant", "content": content})))
    }

    pub fn calls(self, calls: &[(&str, &str, &str)]) -> Self {
        let tool_calls: Vec<Value> = calls
            .iter()
            .map(|(id, name, args)| {
                json!({"id": id, "type": "function", "function": {"name": name, "arguments": args}})
            })
            .collect();
        self.reply(Some(
            json!({"role": "assistant", "content": null, "tool_calls": tool_calls}),
        ))
    }

    pub fn stream_of(self, chunks: Vec<ChatChunk>) -> Self {
        self.streams.lock().unwrap().push_back(chunks);
        self
    }

    pub fn deltas(self, deltas: Vec<Value>) -> Self {
        self.stream_of(deltas.into_iter().map(ChatChunk::delta).collect())
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> ChatRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ChatRequest) -> anyhow::Result<ChatCompletion> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .completions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))?;
        Ok(ChatCompletion {
            choices: next
                .map(|message| {
                    vec![Choice {
                        message: Some(message),
                        finish_reason: None,
                    }]
                })
                .unwrap_or_default(),
        })
    }

    async fn stream(&self, request: &ChatRequest) -> anyhow::Result<ChunkStream> {
        self.requests.lock().unwrap().push(request.clone());
        let chunks = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))?;
        Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

pub fn run(id: &str, status: &str) -> Run {
    serde_json::from_value(json!({"id": id, "status": status})).unwrap()
}

pub fn failed_run(id: &str, message: &str) -> Run {
    serde_json::from_value(json!({
        "id": id,
        "status": "failed",
        "last_error": {"code": "server_error", "message": message}
    }))
    .unwrap()
}

/// A run waiting on `(id, name, arguments)` tool calls.
pub fn requires_action(id: &str, calls: &[(&str, &str, &str)]) -> Run {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|(call_id, name, args)| {
            json!({"id": call_id, "type": "function", "function": {"name": name, "arguments": args}})
        })
        .collect();
    serde_json::from_value(json!({
        "id": id,
        "status": "requires_action",
        "required_action": {
            "type": "submit_tool_outputs",
            "submit_tool_outputs": {"tool_calls": tool_calls}
        }
    }))
    .unwrap()
}

/// Thread/run fake: `retrieve_run` plays back queued run states.
#[derive(Default)]
pub struct FakeThreads {
    statuses: Mutex<VecDeque<Run>>,
    reply: Mutex<String>,
    runs_created: Mutex<usize>,
    rejected_role: Option<String>,
    pub calls: Mutex<Vec<String>>,
    pub submitted: Mutex<Vec<Vec<ToolOutput>>>,
}

impl FakeThreads {
    pub fn new(reply: &str, statuses: Vec<Run>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            reply: Mutex::new(reply.to_string()),
            ..Default::default()
        }
    }

    /// Fail `create_message` for messages with this role.
    pub fn rejecting_role(mut self, role: &str) -> Self {
        self.rejected_role = Some(role.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ThreadsApi for FakeThreads {
    async fn create_thread(&self) -> anyhow::Result<Thread> {
        self.log("create_thread".into());
        Ok(Thread {
            id: "thread_1".into(),
        })
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        self.log(format!("create_message {thread_id} {role} {content}"));
        if self.rejected_role.as_deref() == Some(role) {
            anyhow::bail!("role {role} rejected");
        }
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        _instructions: Option<&str>,
    ) -> anyhow::Result<Run> {
        let mut count = self.runs_created.lock().unwrap();
        *count += 1;
        let id = format!("run_{count}");
        self.log(format!("create_run {thread_id} {assistant_id}"));
        Ok(run(&id, "queued"))
    }

    async fn retrieve_run(&self, _thread_id: &str, run_id: &str) -> anyhow::Result<Run> {
        let next = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted status for {run_id}"))?;
        Ok(Run {
            id: run_id.to_string(),
            ..next
        })
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> anyhow::Result<Run> {
        self.log(format!("submit_tool_outputs {run_id}"));
        self.submitted.lock().unwrap().push(outputs.to_vec());
        Ok(run(run_id, "queued"))
    }

    async fn cancel_run(&self, _thread_id: &str, run_id: &str) -> anyhow::Result<Run> {
        self.log(format!("cancel_run {run_id}"));
        Ok(run(run_id, "cancelling"))
    }

    async fn list_messages(&self, _thread_id: &str) -> anyhow::Result<MessageList> {
        let reply = self.reply.lock().unwrap().clone();
        Ok(serde_json::from_value(json!({
            "data": [
                {"id": "msg_2", "role": "assistant", "content": [{"type": "text", "text": {"value": reply}}]},
                {"id": "msg_1", "role": "user", "content": [{"type": "text", "text": {"value": "earlier"}}]}
            ]
        }))?)
    }
}
