//! Turn engine: completion, tool dispatch, handoff, repeat.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use beeswarm_core::{
    Agent, ContextVariables, Message, Response, Result, SwarmError, ToolCall, ToolChoice,
};
use beeswarm_providers::{ChatProvider, ChatRequest, ToolDefinition};
use beeswarm_tools::strip_context_param;

use crate::dispatcher::{DispatchOutcome, handle_tool_calls};

/// Per-call knobs for [`Swarm::run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Replaces every agent's model for this run.
    pub model_override: Option<String>,
    pub stream: bool,
    pub debug: bool,
    /// `None` is unbounded.
    pub max_turns: Option<usize>,
    pub execute_tools: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            model_override: None,
            stream: false,
            debug: false,
            max_turns: None,
            execute_tools: true,
        }
    }
}

impl RunOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_execute_tools(mut self, execute_tools: bool) -> Self {
        self.execute_tools = execute_tools;
        self
    }
}

/// Orchestrates agents over a chat-completion provider.
#[derive(Clone)]
pub struct Swarm {
    provider: Arc<dyn ChatProvider>,
    agents: HashMap<String, Agent>,
}

impl Swarm {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            provider,
            agents: HashMap::new(),
        }
    }

    /// Make `agent` resolvable by name for transfer functions.
    pub fn register_agent(&mut self, agent: Agent) {
        self.agents.insert(agent.name.clone(), agent);
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.register_agent(agent);
        self
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.get(name)
    }

    pub(crate) fn provider(&self) -> &dyn ChatProvider {
        self.provider.as_ref()
    }

    pub(crate) fn agents(&self) -> &HashMap<String, Agent> {
        &self.agents
    }

    /// Run `agent` against `messages` until the model stops calling tools,
    /// control moves to another agent, or `max_turns` is reached.
    ///
    /// The returned [`Response`] holds only the messages added by this call.
    pub async fn run(
        &self,
        agent: &Agent,
        messages: Vec<Message>,
        context_variables: ContextVariables,
        opts: &RunOptions,
    ) -> Result<Response> {
        if opts.stream {
            return self
                .run_and_stream(agent, messages, context_variables, opts)
                .into_response()
                .await;
        }

        agent.validate()?;
        let mut state = TurnState::new(agent, messages, context_variables);

        while state.may_complete(opts.max_turns) {
            debug_print!(
                opts.debug,
                agent = %state.active.name,
                turn = state.turn,
                messages = state.history.len(),
                "Getting chat completion"
            );

            let request = self.build_request(&state, opts, false);
            let completion = self.provider.complete(&request).await.map_err(|e| {
                error!(agent = %state.active.name, "Provider error: {e:#}");
                SwarmError::Provider(format!("{e:#}"))
            })?;
            let raw = completion.first_message().ok_or_else(|| {
                SwarmError::MalformedResponse("completion has no message".into())
            })?;

            let message = Message::from_wire(raw)?.with_sender(state.active.name.clone());
            debug_print!(
                opts.debug,
                agent = %state.active.name,
                tool_calls = message.tool_calls.len(),
                "Received completion"
            );
            if !state.push_completion(message, opts) {
                break;
            }

            let outcome = handle_tool_calls(
                state.pending_calls(),
                &state.active,
                &state.ctx,
                &self.agents,
            )
            .await?;
            if state.apply_dispatch(outcome) {
                break;
            }
        }

        Ok(state.into_response())
    }

    /// The request for the next turn of `state.active`.
    pub(crate) fn build_request(
        &self,
        state: &TurnState,
        opts: &RunOptions,
        stream: bool,
    ) -> ChatRequest {
        let agent = &state.active;
        let system = Message::system(agent.instructions.resolve(&state.ctx));
        let mut messages = self.provider.format_messages(std::slice::from_ref(&system));
        messages.extend(self.provider.format_messages(&state.history));

        let definitions: Vec<ToolDefinition> = agent
            .functions
            .iter()
            .map(|f| ToolDefinition {
                name: f.name().to_string(),
                description: f.description().to_string(),
                parameters: strip_context_param(&f.parameters_schema()),
            })
            .collect();
        let tools = if definitions.is_empty() {
            None
        } else {
            Some(self.provider.format_tools(&definitions))
        };

        ChatRequest {
            model: opts
                .model_override
                .clone()
                .unwrap_or_else(|| agent.model.clone()),
            messages,
            tool_choice: tools
                .as_ref()
                .and(agent.tool_choice.as_ref())
                .map(ToolChoice::to_value),
            parallel_tool_calls: tools.as_ref().and(agent.parallel_tool_calls),
            tools,
            stream,
        }
    }
}

/// Mutable state of one run, shared by the blocking and streaming loops.
pub(crate) struct TurnState {
    pub active: Agent,
    pub ctx: ContextVariables,
    pub history: Vec<Message>,
    init_len: usize,
    pub turn: usize,
}

impl TurnState {
    pub fn new(agent: &Agent, history: Vec<Message>, ctx: ContextVariables) -> Self {
        Self {
            active: agent.clone(),
            ctx,
            init_len: history.len(),
            history,
            turn: 0,
        }
    }

    /// The first completion always happens.
    pub fn may_complete(&self, max_turns: Option<usize>) -> bool {
        self.turn == 0 || !self.turns_exhausted(max_turns)
    }

    fn turns_exhausted(&self, max_turns: Option<usize>) -> bool {
        max_turns.is_some_and(|max| self.turn >= max)
    }

    /// Append the assistant message. Returns whether its tool calls should run.
    pub fn push_completion(&mut self, message: Message, opts: &RunOptions) -> bool {
        let dispatch =
            message.has_tool_calls() && opts.execute_tools && !self.turns_exhausted(opts.max_turns);
        self.history.push(message);
        dispatch
    }

    /// Tool calls of the last appended message.
    pub fn pending_calls(&self) -> &[ToolCall] {
        self.history
            .last()
            .map(|m| m.tool_calls.as_slice())
            .unwrap_or_default()
    }

    /// Fold a dispatch into the run. Returns `true` when control moved to another agent.
    pub fn apply_dispatch(&mut self, outcome: DispatchOutcome) -> bool {
        self.history.extend(outcome.messages);
        self.ctx = outcome.context_variables;
        self.turn += 1;

        let Some(next) = outcome.handoff else {
            return false;
        };
        let switched = next.name != self.active.name;
        if switched {
            info!(from = %self.active.name, to = %next.name, "Switching agent");
            self.history
                .push(Message::system(format!("Switching to {}", next.name)));
        }
        self.active = next;
        switched
    }

    pub fn snapshot(&self) -> Response {
        Response {
            messages: self.history[self.init_len..].to_vec(),
            agent: self.active.clone(),
            context_variables: self.ctx.clone(),
        }
    }

    pub fn into_response(self) -> Response {
        Response {
            messages: self.history.into_iter().skip(self.init_len).collect(),
            agent: self.active,
            context_variables: self.ctx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beeswarm_core::Instructions;
    use beeswarm_providers::{ChatCompletion, ChunkStream};
    use beeswarm_tools::{FunctionSchema, FunctionTool, ParamType};
    use serde_json::json;

    struct NullProvider;

    #[async_trait::async_trait]
    impl ChatProvider for NullProvider {
        fn id(&self) -> &str {
            "null"
        }

        async fn complete(&self, _request: &ChatRequest) -> anyhow::Result<ChatCompletion> {
            anyhow::bail!("not used")
        }

        async fn stream(&self, _request: &ChatRequest) -> anyhow::Result<ChunkStream> {
            anyhow::bail!("not used")
        }
    }

    fn swarm() -> Swarm {
        Swarm::new(Arc::new(NullProvider))
    }

    #[test]
    fn test_request_resolves_instructions_each_turn() {
        let agent = Agent::new("Greeter", "gpt-4o")
            .with_instructions(Instructions::template("Help {user}."));
        let mut state = TurnState::new(
            &agent,
            vec![Message::user("hi")],
            ContextVariables::from([("user".to_string(), "Ada".to_string())]),
        );

        let request = swarm().build_request(&state, &RunOptions::default(), false);
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.messages[0]["role"], "system");
        assert_eq!(request.messages[0]["content"], "Help Ada.");
        assert_eq!(request.messages[1]["content"], "hi");
        assert!(request.tools.is_none());
        assert!(request.tool_choice.is_none());

        state.ctx.insert("user".into(), "Grace".into());
        let request = swarm().build_request(&state, &RunOptions::default(), true);
        assert_eq!(request.messages[0]["content"], "Help Grace.");
        assert!(request.stream);
    }

    #[test]
    fn test_request_tools_strip_context_param() {
        let schema = FunctionSchema::new()
            .required("city", ParamType::String, "City name")
            .required("context_variables", ParamType::Object, "")
            .build();
        let tool = FunctionTool::new("weather", "Get weather", schema, |_, _| async {
            Ok("sunny")
        });
        let agent = Agent::new("A", "gpt-4o")
            .with_function(tool.into_arc())
            .with_tool_choice(ToolChoice::Required)
            .with_parallel_tool_calls(false);
        let state = TurnState::new(&agent, Vec::new(), ContextVariables::new());

        let request = swarm().build_request(&state, &RunOptions::default().with_model("o3"), false);
        assert_eq!(request.model, "o3");
        let tools = request.tools.unwrap();
        assert_eq!(tools[0]["function"]["name"], "weather");
        let params = &tools[0]["function"]["parameters"];
        assert!(params["properties"].get("context_variables").is_none());
        assert_eq!(params["required"], json!(["city"]));
        assert_eq!(request.tool_choice, Some(json!("required")));
        assert_eq!(request.parallel_tool_calls, Some(false));
    }

    #[test]
    fn test_turn_limits() {
        let agent = Agent::new("A", "m");
        let mut state = TurnState::new(&agent, Vec::new(), ContextVariables::new());
        assert!(state.may_complete(Some(0)));
        state.turn = 1;
        assert!(!state.may_complete(Some(1)));
        assert!(state.may_complete(Some(2)));
        assert!(state.may_complete(None));
    }

    #[test]
    fn test_apply_dispatch_switches_agent() {
        let agent = Agent::new("Triage", "m");
        let mut state = TurnState::new(&agent, vec![Message::user("buy")], ContextVariables::new());
        let switched = state.apply_dispatch(DispatchOutcome {
            messages: vec![Message::tool_result("c1", r#"{"agent":"Sales"}"#)],
            context_variables: ContextVariables::from([("k".to_string(), "v".to_string())]),
            handoff: Some(Agent::new("Sales", "m")),
        });
        assert!(switched);

        let response = state.into_response();
        assert_eq!(response.agent.name, "Sales");
        assert_eq!(response.messages.len(), 2);
        assert_eq!(response.messages[1].content, "Switching to Sales");
        assert_eq!(response.context_variables["k"], "v");
    }
}
