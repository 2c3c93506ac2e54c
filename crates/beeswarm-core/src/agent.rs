//! Agent definitions and the function-call contract.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::context::{ContextVariables, coerce_context};
use crate::error::{Result, SwarmError};
use crate::types::Message;

/// System prompt source for an agent.
#[derive(Clone)]
pub enum Instructions {
    Static(String),
    Dynamic(Arc<dyn Fn(&ContextVariables) -> String + Send + Sync>),
}

impl Instructions {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&ContextVariables) -> String + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    /// Text with `{key}` placeholders filled from context variables each turn.
    /// Unknown keys are left untouched.
    pub fn template(text: impl Into<String>) -> Self {
        let text = text.into();
        match Regex::new(r"\{(\w+)\}") {
            Ok(placeholder) => Self::dynamic(move |ctx| render_template(&placeholder, &text, ctx)),
            Err(_) => Self::Static(text),
        }
    }

    /// Resolve the prompt for the current turn.
    pub fn resolve(&self, ctx: &ContextVariables) -> String {
        match self {
            Self::Static(text) => text.clone(),
            Self::Dynamic(f) => f(ctx),
        }
    }
}

impl Default for Instructions {
    fn default() -> Self {
        Self::Static("You are a helpful agent.".to_string())
    }
}

impl From<&str> for Instructions {
    fn from(s: &str) -> Self {
        Self::Static(s.to_string())
    }
}

impl From<String> for Instructions {
    fn from(s: String) -> Self {
        Self::Static(s)
    }
}

impl fmt::Debug for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

fn render_template(placeholder: &Regex, text: &str, ctx: &ContextVariables) -> String {
    placeholder
        .replace_all(text, |caps: &Captures| match ctx.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Which tool the model may call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Function(String),
}

impl ToolChoice {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Auto => json!("auto"),
            Self::None => json!("none"),
            Self::Required => json!("required"),
            Self::Function(name) => json!({"type": "function", "function": {"name": name}}),
        }
    }

    /// Parse `auto`/`none`/`required`, anything else names a function.
    pub fn parse(s: &str) -> Self {
        match s {
            "auto" => Self::Auto,
            "none" => Self::None,
            "required" => Self::Required,
            name => Self::Function(name.to_string()),
        }
    }
}

/// A function an agent exposes to the model.
#[async_trait]
pub trait AgentFunction: Send + Sync {
    /// Name the model uses to call this function.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the parameters. May mention `context_variables`;
    /// the engine strips it before the schema reaches the model.
    fn parameters_schema(&self) -> Value;

    /// Invoke the function with parsed arguments and the current context.
    async fn call(&self, args: Map<String, Value>, ctx: &ContextVariables)
    -> Result<FunctionOutput>;
}

/// A named participant in a conversation.
#[derive(Clone)]
pub struct Agent {
    pub name: String,
    pub model: String,
    pub instructions: Instructions,
    pub functions: Vec<Arc<dyn AgentFunction>>,
    pub tool_choice: Option<ToolChoice>,
    pub parallel_tool_calls: Option<bool>,
    /// Seed context handed to the run when control moves to this agent.
    pub context: Option<Map<String, Value>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            instructions: Instructions::default(),
            functions: Vec::new(),
            tool_choice: None,
            parallel_tool_calls: None,
            context: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<Instructions>) -> Self {
        self.instructions = instructions.into();
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

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = Some(parallel);
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = Some(context);
        self
    }

    /// Find a registered function by exact name.
    pub fn function(&self, name: &str) -> Option<&Arc<dyn AgentFunction>> {
        self.functions.iter().find(|f| f.name() == name)
    }

    /// Name and model must be non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SwarmError::Agent("agent name must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(SwarmError::Agent(format!(
                "agent '{}' has no model",
                self.name
            )));
        }
        Ok(())
    }

    /// The attached context coerced to string values.
    pub fn context_variables(&self) -> ContextVariables {
        self.context.as_ref().map(coerce_context).unwrap_or_default()
    }
}

impl PartialEq for Agent {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let functions: Vec<&str> = self.functions.iter().map(|func| func.name()).collect();
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("instructions", &self.instructions)
            .field("functions", &functions)
            .field("tool_choice", &self.tool_choice)
            .field("parallel_tool_calls", &self.parallel_tool_calls)
            .field("context", &self.context)
            .finish()
    }
}

/// Explicit function result: tool-message text, optional handoff and context update.
#[derive(Debug, Clone, Default)]
pub struct FunctionResult {
    pub value: String,
    pub agent: Option<Agent>,
    pub context_variables: ContextVariables,
}

impl FunctionResult {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_variables.insert(key.into(), value.into());
        self
    }
}

/// Handoff to an agent known only by name, resolved by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub assistant: String,
    pub request: String,
    pub history: Vec<Message>,
}

/// What a function returned.
#[derive(Debug, Clone)]
pub enum FunctionOutput {
    /// Plain value; strings are used verbatim, anything else is JSON-encoded.
    Value(Value),
    Result(FunctionResult),
    Handoff(Agent),
    Transfer(TransferRequest),
}

impl FunctionOutput {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Value(Value::String(value.into()))
    }

    pub fn handoff(agent: Agent) -> Self {
        Self::Handoff(agent)
    }

    /// Serialize an arbitrary value into a plain output.
    pub fn serialize<T: Serialize + fmt::Debug>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Value)
            .map_err(|e| SwarmError::Classification(format!("{value:?} ({e})")))
    }
}

impl From<String> for FunctionOutput {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

impl From<&str> for FunctionOutput {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<Value> for FunctionOutput {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<FunctionResult> for FunctionOutput {
    fn from(r: FunctionResult) -> Self {
        Self::Result(r)
    }
}

impl From<Agent> for FunctionOutput {
    fn from(a: Agent) -> Self {
        Self::Handoff(a)
    }
}

impl From<TransferRequest> for FunctionOutput {
    fn from(t: TransferRequest) -> Self {
        Self::Transfer(t)
    }
}

/// Outcome of a run: messages produced since entry, the active agent and final context.
#[derive(Debug, Clone)]
pub struct Response {
    pub messages: Vec<Message>,
    pub agent: Agent,
    pub context_variables: ContextVariables,
}

impl Response {
    /// Content of the last message, if any.
    pub fn last_content(&self) -> Option<&str> {
        self.messages.last().map(|m| m.content.as_str())
    }
}
