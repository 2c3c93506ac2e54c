//! Thread engine: routes tasks to provider-hosted assistants over the
//! thread/run protocol.
//!
//! One engine owns one active thread and at most one in-flight run, so tasks
//! run strictly one after another.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use beeswarm_core::context::merge_context;
use beeswarm_core::transcript::TranscriptLog;
use beeswarm_core::types::parse_arguments;
use beeswarm_core::{
    ContextVariables, Message, Result, Role, SwarmError, ToolCall, TransferError,
};
use beeswarm_providers::threads::{Run, RunStatus, Thread, ThreadsApi, ToolOutput};
use beeswarm_providers::{ChatProvider, ChatRequest};

use crate::assistant::Assistant;
use crate::dispatcher::{HandoffTarget, execute_call};
use crate::task::{EvaluationTask, Task};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_HANDOFFS: usize = 8;

const TRIAGE_SYSTEM_PROMPT: &str = "You route user requests to the assistant best suited to \
handle them. Reply with exactly one assistant name from the list you are given and nothing \
else. If none of them fits, reply with None.";

const JUDGE_PROMPT: &str = "Compare the output of a task with the expected answer. Reply True \
if the output conveys the expected answer and False otherwise. Reply with a single word.";

/// Chat model used for triage and judging.
#[derive(Clone)]
struct Router {
    provider: Arc<dyn ChatProvider>,
    model: String,
}

impl Router {
    async fn ask(&self, system: Option<&str>, user: String) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(user));

        let request = ChatRequest {
            model: self.model.clone(),
            messages: self.provider.format_messages(&messages),
            ..Default::default()
        };
        let completion = self
            .provider
            .complete(&request)
            .await
            .map_err(|e| SwarmError::Provider(format!("{e:#}")))?;
        let message = completion
            .first_message()
            .ok_or_else(|| SwarmError::MalformedResponse("completion has no message".into()))?;
        Ok(message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRun {
    /// Assistant the task was routed to.
    pub assistant: String,
    /// Assistant holding the conversation at the end, after handoffs.
    pub final_assistant: String,
    pub output: String,
    pub handoffs: usize,
}

/// Per-task line of a [`DeployReport`].
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub description: String,
    pub assistant: Option<String>,
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groundtruth_passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_passed: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeployReport {
    pub total: usize,
    pub groundtruth_passed: usize,
    pub assistant_passed: usize,
    pub tasks: Vec<TaskReport>,
}

impl DeployReport {
    pub fn groundtruth_rate(&self) -> f64 {
        rate(self.groundtruth_passed, self.total)
    }

    pub fn assistant_rate(&self) -> f64 {
        rate(self.assistant_passed, self.total)
    }
}

fn rate(passed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        passed as f64 / total as f64 * 100.0
    }
}

/// What a batch of required tool calls resolved to.
enum CallsOutcome {
    Submit(Vec<ToolOutput>),
    Handoff { to: usize, history: Vec<Message> },
}

pub struct ThreadEngine {
    api: Arc<dyn ThreadsApi>,
    router: Option<Router>,
    assistants: Vec<Assistant>,
    thread: Option<Thread>,
    current_run: Option<Run>,
    poll_interval: Duration,
    max_handoffs: usize,
    transcripts: Option<TranscriptLog>,
}

impl ThreadEngine {
    pub fn new(api: Arc<dyn ThreadsApi>) -> Self {
        Self {
            api,
            router: None,
            assistants: Vec::new(),
            thread: None,
            current_run: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_handoffs: DEFAULT_MAX_HANDOFFS,
            transcripts: None,
        }
    }

    /// Chat model for triaging `auto` tasks and judging evaluation output.
    pub fn with_router(mut self, provider: Arc<dyn ChatProvider>, model: impl Into<String>) -> Self {
        self.router = Some(Router {
            provider,
            model: model.into(),
        });
        self
    }

    pub fn with_assistant(mut self, assistant: Assistant) -> Self {
        self.assistants.push(assistant);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_handoffs(mut self, max_handoffs: usize) -> Self {
        self.max_handoffs = max_handoffs;
        self
    }

    /// Save histories of assistants with their log flag set here after each
    /// task outside test mode.
    pub fn with_transcripts(mut self, log: TranscriptLog) -> Self {
        self.transcripts = Some(log);
        self
    }

    pub fn assistants(&self) -> &[Assistant] {
        &self.assistants
    }

    pub fn assistant(&self, name: &str) -> Option<&Assistant> {
        self.assistants.iter().find(|a| a.name == name)
    }

    pub fn thread(&self) -> Option<&Thread> {
        self.thread.as_ref()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.assistants.iter().position(|a| a.name == name)
    }

    fn router(&self) -> Result<&Router> {
        self.router
            .as_ref()
            .ok_or_else(|| SwarmError::Config("no chat model configured for triage".into()))
    }

    /// Start a fresh thread, dropping any run state.
    pub async fn reset_thread(&mut self) -> Result<()> {
        let thread = self.api.create_thread().await.map_err(provider_error)?;
        debug!(thread_id = %thread.id, "Thread created");
        self.thread = Some(thread);
        self.current_run = None;
        Ok(())
    }

    /// Ask the router which assistant should handle `request`.
    /// `None` when the answer names no registered assistant.
    pub async fn triage_request(&self, request: &str) -> Result<Option<String>> {
        let names = self
            .assistants
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let answer = self
            .router()?
            .ask(
                Some(TRIAGE_SYSTEM_PROMPT),
                format!("Request: {request}\n\nAvailable assistants: {names}"),
            )
            .await?;

        match self.assistant(&answer) {
            Some(assistant) => {
                info!(assistant = %assistant.name, "Triaged request");
                Ok(Some(assistant.name.clone()))
            }
            None => {
                warn!(answer = %answer, "Triage named no known assistant");
                Ok(None)
            }
        }
    }

    /// Route `task` and run it on a fresh thread. `None` when no assistant fits.
    pub async fn run_task(&mut self, task: &Task) -> Result<Option<TaskRun>> {
        info!(task_id = %task.id, assistant = %task.assistant, "Running task");

        let name = if task.needs_triage() {
            self.triage_request(&task.description).await?
        } else {
            self.assistant(&task.assistant).map(|a| a.name.clone())
        };
        let Some(name) = name else {
            warn!(task_id = %task.id, "No suitable assistant found");
            return Ok(None);
        };

        self.reset_thread().await?;
        self.run_request(&task.description, &name, Some(&task.id))
            .await
            .map(Some)
    }

    /// Post `request` to the active thread and drive a run of `assistant_name`
    /// to completion, following handoffs.
    pub async fn run_request(
        &mut self,
        request: &str,
        assistant_name: &str,
        task_id: Option<&str>,
    ) -> Result<TaskRun> {
        let thread_id = self
            .thread
            .as_ref()
            .map(|t| t.id.clone())
            .ok_or_else(|| TransferError::Thread("no active thread".into()))?;
        let mut active = self
            .index_of(assistant_name)
            .ok_or_else(|| TransferError::AssistantNotFound(assistant_name.to_string()))?;

        if let Some(task_id) = task_id {
            self.assistants[active].set_current_task_id(task_id);
        }
        self.assistants[active].add_user_message(request);

        self.api
            .create_message(&thread_id, "user", request)
            .await
            .map_err(provider_error)?;
        self.start_run(&thread_id, active).await?;

        let mut ctx = ContextVariables::from([("request".to_string(), request.to_string())]);
        let mut handoffs = 0;

        loop {
            let run = self.poll_run(&thread_id).await?;
            match run.status {
                RunStatus::Completed => break,
                RunStatus::RequiresAction => {
                    let calls = run.pending_tool_calls();
                    match self.execute_calls(active, &calls, &mut ctx).await? {
                        CallsOutcome::Submit(outputs) => {
                            debug!(run_id = %run.id, outputs = outputs.len(), "Submitting tool outputs");
                            let run = self
                                .api
                                .submit_tool_outputs(&thread_id, &run.id, &outputs)
                                .await
                                .map_err(provider_error)?;
                            self.current_run = Some(run);
                        }
                        CallsOutcome::Handoff { to, history } => {
                            handoffs += 1;
                            if handoffs > self.max_handoffs {
                                return Err(SwarmError::Run(format!(
                                    "handoff limit of {} exceeded",
                                    self.max_handoffs
                                )));
                            }
                            self.cancel_current_run(&thread_id).await?;
                            active = self.switch_assistant(active, to);
                            self.transfer_history(&thread_id, active, history).await?;
                            self.start_run(&thread_id, active).await?;
                        }
                    }
                }
                status => {
                    let detail = run
                        .last_error
                        .as_ref()
                        .map(|e| format!(": {} {}", e.code, e.message))
                        .unwrap_or_default();
                    error!(run_id = %run.id, ?status, "Run did not complete");
                    return Err(SwarmError::Run(format!(
                        "run {} ended with status {status:?}{detail}",
                        run.id
                    )));
                }
            }
        }

        let messages = self
            .api
            .list_messages(&thread_id)
            .await
            .map_err(provider_error)?;
        let output = messages
            .latest_text()
            .ok_or_else(|| SwarmError::Run("run completed without a final message".into()))?
            .to_string();

        self.current_run = None;
        self.assistants[active].add_assistant_message(output.clone());

        Ok(TaskRun {
            assistant: assistant_name.to_string(),
            final_assistant: self.assistants[active].name.clone(),
            output,
            handoffs,
        })
    }

    async fn start_run(&mut self, thread_id: &str, index: usize) -> Result<()> {
        let assistant = &self.assistants[index];
        let run = self
            .api
            .create_run(thread_id, &assistant.assistant_id, assistant.instructions.as_deref())
            .await
            .map_err(provider_error)?;
        info!(assistant = %assistant.name, run_id = %run.id, "Run started");
        self.current_run = Some(run);
        Ok(())
    }

    /// Poll the current run at a fixed interval until it leaves the pending states.
    async fn poll_run(&mut self, thread_id: &str) -> Result<Run> {
        let run_id = self
            .current_run
            .as_ref()
            .map(|r| r.id.clone())
            .ok_or_else(|| TransferError::Thread("no active run".into()))?;

        loop {
            let run = self
                .api
                .retrieve_run(thread_id, &run_id)
                .await
                .map_err(provider_error)?;
            self.current_run = Some(run.clone());
            if !run.status.is_pending() {
                debug!(run_id = %run.id, status = ?run.status, "Run status");
                return Ok(run);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Cancel the in-flight run and wait until the provider settles it.
    async fn cancel_current_run(&mut self, thread_id: &str) -> Result<()> {
        let run_id = self
            .current_run
            .as_ref()
            .map(|r| r.id.clone())
            .ok_or_else(|| TransferError::Thread("no active run to cancel".into()))?;

        let run = self
            .api
            .cancel_run(thread_id, &run_id)
            .await
            .map_err(provider_error)?;
        info!(run_id = %run_id, "Run cancelled for handoff");
        self.current_run = Some(run);
        let run = self.poll_run(thread_id).await?;
        if !run.status.is_terminal() {
            return Err(TransferError::Thread(format!(
                "run {} did not settle after cancel: {:?}",
                run.id, run.status
            ))
            .into());
        }
        self.current_run = None;
        debug!(run_id = %run.id, status = ?run.status, "Cancelled run settled");
        Ok(())
    }

    /// Post history carried by a transfer to the thread ahead of the target's run.
    async fn transfer_history(
        &mut self,
        thread_id: &str,
        target: usize,
        history: Vec<Message>,
    ) -> Result<()> {
        let history: Vec<Message> = history
            .into_iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant) && !m.content.is_empty())
            .collect();
        if history.is_empty() {
            return Ok(());
        }
        let name = self.assistants[target].name.clone();
        for message in &history {
            self.api
                .create_message(thread_id, message.role.as_str(), &message.content)
                .await
                .map_err(|e| TransferError::ContextTransfer(format!("{name}: {e:#}")))?;
        }
        debug!(assistant = %name, messages = history.len(), "Transferred history");
        self.assistants[target].add_messages(history);
        Ok(())
    }

    /// Run the required calls for the assistant at `active`, stopping at the
    /// first handoff.
    async fn execute_calls(
        &mut self,
        active: usize,
        calls: &[ToolCall],
        ctx: &mut ContextVariables,
    ) -> Result<CallsOutcome> {
        let mut outputs = Vec::with_capacity(calls.len());

        for call in calls {
            info!(tool = %call.name, assistant = %self.assistants[active].name, "Executing tool");
            let args = parse_arguments(&call.arguments).unwrap_or_default();
            self.assistants[active].add_tool_message(call.name.clone(), args);

            let functions = self.assistants[active].functions().to_vec();
            let classified = execute_call(&functions, call, ctx).await?;
            merge_context(ctx, &classified.context_variables);

            if let Some(target) = classified.handoff {
                let to = self
                    .index_of(target.name())
                    .ok_or_else(|| TransferError::AssistantNotFound(target.name().to_string()))?;
                if to != active {
                    let history = match target {
                        HandoffTarget::Named(transfer) => transfer.history,
                        HandoffTarget::Agent(_) => Vec::new(),
                    };
                    return Ok(CallsOutcome::Handoff { to, history });
                }
                debug!(
                    assistant = %self.assistants[active].name,
                    "Transfer to the active assistant, submitting as output"
                );
            }

            outputs.push(ToolOutput {
                tool_call_id: call.id.clone(),
                output: classified.value,
            });
        }

        Ok(CallsOutcome::Submit(outputs))
    }

    fn switch_assistant(&mut self, from: usize, to: usize) -> usize {
        info!(
            from = %self.assistants[from].name,
            to = %self.assistants[to].name,
            "Handing off"
        );
        let source = self.assistants[from].clone();
        source.pass_context(&mut self.assistants[to]);
        if let Some(task_id) = self.assistants[from].current_task_id().map(String::from) {
            self.assistants[to].set_current_task_id(task_id);
        }
        to
    }

    /// Ask the router whether `output` matches `groundtruth`.
    pub async fn judge(&self, output: &str, groundtruth: &str) -> Result<bool> {
        let answer = self
            .router()?
            .ask(
                Some(JUDGE_PROMPT),
                format!("Output: {output}\n\nExpected: {groundtruth}"),
            )
            .await?;
        Ok(answer == "True")
    }

    async fn save_transcripts(&self, names: &[&str]) {
        let Some(log) = &self.transcripts else {
            return;
        };
        for assistant in self
            .assistants
            .iter()
            .filter(|a| a.log_flag() && names.contains(&a.name.as_str()))
        {
            match assistant.save_conversation(log).await {
                Ok(path) => debug!(assistant = %assistant.name, path = %path.display(), "Conversation saved"),
                Err(e) => warn!(assistant = %assistant.name, %e, "Failed to save conversation"),
            }
        }
    }

    /// Run `tasks` one after another. Task failures are recorded in the report.
    pub async fn deploy(&mut self, tasks: &[Task]) -> DeployReport {
        let mut report = DeployReport::default();
        for task in tasks {
            let line = match self.run_task(task).await {
                Ok(run) => {
                    if let Some(run) = &run {
                        self.save_transcripts(&[
                            run.assistant.as_str(),
                            run.final_assistant.as_str(),
                        ])
                        .await;
                    }
                    task_report(task, run, None)
                }
                Err(e) => {
                    error!(task_id = %task.id, %e, "Task failed");
                    task_report(task, None, Some(e))
                }
            };
            report.total += 1;
            report.tasks.push(line);
        }
        report
    }

    /// Run evaluation tasks, judging each output against its groundtruth and
    /// checking the routing against the expected assistant.
    pub async fn deploy_tests(&mut self, tasks: &[EvaluationTask]) -> Result<DeployReport> {
        let mut report = DeployReport::default();
        for case in tasks {
            report.total += 1;
            let (run, err) = match self.run_task(&case.task).await {
                Ok(run) => (run, None),
                Err(e) => {
                    error!(task_id = %case.task.id, %e, "Task failed");
                    (None, Some(e))
                }
            };

            let output = run.as_ref().map(|r| r.output.as_str()).unwrap_or_default();
            let groundtruth_passed = self.judge(output, &case.groundtruth).await?;
            let assistant_passed = run
                .as_ref()
                .is_some_and(|r| r.assistant == case.expected_assistant);

            if groundtruth_passed {
                report.groundtruth_passed += 1;
            }
            if assistant_passed {
                report.assistant_passed += 1;
            }
            info!(
                task_id = %case.task.id,
                groundtruth_passed,
                assistant_passed,
                expected = %case.expected_assistant,
                "Evaluated task"
            );

            let mut line = task_report(&case.task, run, err);
            line.groundtruth_passed = Some(groundtruth_passed);
            line.assistant_passed = Some(assistant_passed);
            report.tasks.push(line);
        }
        Ok(report)
    }
}

fn task_report(task: &Task, run: Option<TaskRun>, err: Option<SwarmError>) -> TaskReport {
    TaskReport {
        task_id: task.id.clone(),
        description: task.description.clone(),
        assistant: run.as_ref().map(|r| r.assistant.clone()),
        output: run.map(|r| r.output),
        error: err.map(|e| e.to_string()),
        groundtruth_passed: None,
        assistant_passed: None,
    }
}

fn provider_error(e: anyhow::Error) -> SwarmError {
    error!("Provider error: {e:#}");
    SwarmError::Provider(format!("{e:#}"))
}
