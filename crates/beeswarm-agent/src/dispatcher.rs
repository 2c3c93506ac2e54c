//! Tool-call dispatch: resolve, invoke, classify, fold context.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use beeswarm_core::context::{ContextVariables, merge_context};
use beeswarm_core::types::parse_arguments;
use beeswarm_core::{
    Agent, AgentFunction, FunctionOutput, Message, Result, SwarmError, ToolCall, TransferError,
    TransferRequest,
};

/// Where a handoff points.
#[derive(Debug, Clone)]
pub enum HandoffTarget {
    Agent(Agent),
    /// Resolved by name against the engine's registry.
    Named(TransferRequest),
}

impl HandoffTarget {
    pub fn name(&self) -> &str {
        match self {
            Self::Agent(agent) => &agent.name,
            Self::Named(transfer) => &transfer.assistant,
        }
    }
}

/// A function's output reduced to tool-message text, optional handoff and context update.
#[derive(Debug, Clone)]
pub struct Classified {
    pub value: String,
    pub handoff: Option<HandoffTarget>,
    pub context_variables: ContextVariables,
}

impl Classified {
    fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            handoff: None,
            context_variables: ContextVariables::new(),
        }
    }
}

/// Tool content announcing a handoff.
pub fn transfer_envelope(agent_name: &str) -> String {
    json!({ "agent": agent_name }).to_string()
}

/// Classify a function output. Explicit results first, then handoffs, then plain values.
pub fn classify(output: FunctionOutput) -> Result<Classified> {
    match output {
        FunctionOutput::Result(result) => {
            if let Some(agent) = &result.agent {
                validate_target(agent)?;
            }
            Ok(Classified {
                value: result.value,
                handoff: result.agent.map(HandoffTarget::Agent),
                context_variables: result.context_variables,
            })
        }
        FunctionOutput::Handoff(agent) => {
            validate_target(&agent)?;
            Ok(Classified {
                value: transfer_envelope(&agent.name),
                context_variables: agent.context_variables(),
                handoff: Some(HandoffTarget::Agent(agent)),
            })
        }
        FunctionOutput::Transfer(transfer) => {
            if transfer.assistant.trim().is_empty() {
                return Err(TransferError::InvalidArguments(
                    "transfer target must name an agent".into(),
                )
                .into());
            }
            let mut context_variables = ContextVariables::new();
            if !transfer.request.is_empty() {
                context_variables.insert("request".into(), transfer.request.clone());
            }
            Ok(Classified {
                value: transfer_envelope(&transfer.assistant),
                handoff: Some(HandoffTarget::Named(transfer)),
                context_variables,
            })
        }
        FunctionOutput::Value(Value::String(s)) => Ok(Classified::plain(s)),
        FunctionOutput::Value(other) => serde_json::to_string(&other)
            .map(Classified::plain)
            .map_err(|e| SwarmError::Classification(format!("{other:?} ({e})"))),
    }
}

fn validate_target(agent: &Agent) -> Result<()> {
    agent
        .validate()
        .map_err(|e| TransferError::InvalidArguments(format!("invalid handoff target: {e}")).into())
}

/// Arguments passed to a function: the context's `request` first, then the model's own.
fn call_arguments(call: &ToolCall, ctx: &ContextVariables) -> Result<Map<String, Value>> {
    let mut args = Map::new();
    args.insert(
        "request".into(),
        json!(ctx.get("request").cloned().unwrap_or_default()),
    );
    args.extend(parse_arguments(&call.arguments)?);
    Ok(args)
}

/// Run one tool call against `functions`.
///
/// Unknown names, unparsable arguments and ordinary function failures become
/// tool-message text. Transfer and classification errors are returned.
pub async fn execute_call(
    functions: &[Arc<dyn AgentFunction>],
    call: &ToolCall,
    ctx: &ContextVariables,
) -> Result<Classified> {
    let Some(function) = functions.iter().find(|f| f.name() == call.name) else {
        warn!(tool = %call.name, "Tool not found");
        return Ok(Classified::plain(format!(
            "Error: Function {} not found",
            call.name
        )));
    };

    let args = match call_arguments(call, ctx) {
        Ok(args) => args,
        Err(e) => {
            warn!(tool = %call.name, %e, "Invalid tool arguments");
            return Ok(Classified::plain(format!(
                "Error: Invalid arguments for {}: {e}",
                call.name
            )));
        }
    };

    let shown = serde_json::Value::Object(args.clone());
    debug!(tool = %call.name, args = %shown, "Executing tool");

    match function.call(args, ctx).await {
        Ok(output) => classify(output),
        Err(e @ (SwarmError::Transfer(_) | SwarmError::Classification(_))) => Err(e),
        Err(e) => {
            warn!(tool = %call.name, %e, "Tool execution error");
            Ok(Classified::plain(format!("Error: {e}")))
        }
    }
}

/// Result of dispatching one assistant message's tool calls.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub messages: Vec<Message>,
    pub context_variables: ContextVariables,
    /// Set when a call handed off; later calls in the batch were skipped.
    pub handoff: Option<Agent>,
}

/// Execute `calls` in order for `agent`, stopping after the first handoff.
pub async fn handle_tool_calls(
    calls: &[ToolCall],
    agent: &Agent,
    ctx: &ContextVariables,
    registry: &HashMap<String, Agent>,
) -> Result<DispatchOutcome> {
    let mut outcome = DispatchOutcome {
        messages: Vec::with_capacity(calls.len()),
        context_variables: ctx.clone(),
        handoff: None,
    };

    for (index, call) in calls.iter().enumerate() {
        let classified = execute_call(&agent.functions, call, &outcome.context_variables).await?;
        let handoff = classified
            .handoff
            .map(|target| resolve_target(target, registry))
            .transpose()?;

        if let Some(resolved) = &handoff {
            merge_context(&mut outcome.context_variables, &resolved.seed);
        }
        merge_context(&mut outcome.context_variables, &classified.context_variables);

        outcome.messages.push(
            Message::tool_result(call.id.clone(), classified.value)
                .with_sender(call.name.clone()),
        );

        if let Some(resolved) = handoff {
            outcome.messages.extend(resolved.history);
            let skipped = calls.len() - index - 1;
            info!(from = %agent.name, to = %resolved.agent.name, tool = %call.name, skipped, "Handoff");
            outcome.handoff = Some(resolved.agent);
            break;
        }
    }

    Ok(outcome)
}

/// A handoff target looked up and ready to take over.
struct Resolved {
    agent: Agent,
    /// Context the target brings along. Values set by the call itself win.
    seed: ContextVariables,
    /// Conversation the transfer carried over.
    history: Vec<Message>,
}

fn resolve_target(target: HandoffTarget, registry: &HashMap<String, Agent>) -> Result<Resolved> {
    match target {
        HandoffTarget::Agent(agent) => Ok(Resolved {
            agent,
            seed: ContextVariables::new(),
            history: Vec::new(),
        }),
        HandoffTarget::Named(transfer) => {
            let agent = registry
                .get(&transfer.assistant)
                .cloned()
                .ok_or_else(|| TransferError::AssistantNotFound(transfer.assistant.clone()))?;
            validate_target(&agent)?;
            Ok(Resolved {
                seed: agent.context_variables(),
                agent,
                history: transfer.history,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beeswarm_core::FunctionResult;
    use beeswarm_tools::{FunctionTool, schema_from_params, transfer_tool};

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    fn echo_request() -> Arc<dyn AgentFunction> {
        FunctionTool::new("echo", "", schema_from_params(&["request"]), |args, _| async move {
            Ok(args.get("request").and_then(Value::as_str).unwrap_or("").to_string())
        })
        .into_arc()
    }

    #[test]
    fn test_classify_plain_values() {
        assert_eq!(classify("ok".into()).unwrap().value, "ok");
        assert_eq!(
            classify(FunctionOutput::Value(json!({"temp": 67}))).unwrap().value,
            r#"{"temp":67}"#
        );
        let c = classify(FunctionOutput::Value(json!(42))).unwrap();
        assert_eq!(c.value, "42");
        assert!(c.handoff.is_none());
        assert!(c.context_variables.is_empty());
    }

    #[test]
    fn test_classify_handoff_envelope_and_context() {
        let sales = Agent::new("Sales", "gpt-4o")
            .with_context(json!({"tier": "gold"}).as_object().unwrap().clone());
        let c = classify(FunctionOutput::Handoff(sales)).unwrap();
        assert_eq!(c.value, r#"{"agent":"Sales"}"#);
        assert_eq!(c.handoff.unwrap().name(), "Sales");
        assert_eq!(c.context_variables["tier"], "gold");
    }

    #[test]
    fn test_classify_result_verbatim() {
        let result = FunctionResult::new("Handing you to sales")
            .with_agent(Agent::new("Sales", "gpt-4o"))
            .with_context("lead", "hot");
        let c = classify(result.into()).unwrap();
        assert_eq!(c.value, "Handing you to sales");
        assert_eq!(c.context_variables["lead"], "hot");
    }

    #[test]
    fn test_classify_invalid_target_is_fatal() {
        let err = classify(FunctionOutput::Handoff(Agent::new("Ghost", ""))).unwrap_err();
        assert!(matches!(
            err,
            SwarmError::Transfer(TransferError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recovered() {
        let agent = Agent::new("Triage", "gpt-4o");
        let outcome = handle_tool_calls(
            &[call("call_1", "nope", "{}")],
            &agent,
            &ContextVariables::new(),
            &HashMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].content, "Error: Function nope not found");
        assert_eq!(outcome.messages[0].tool_call_id.as_deref(), Some("call_1"));
        assert!(outcome.handoff.is_none());
    }

    #[tokio::test]
    async fn test_request_injected_and_overridable() {
        let agent = Agent::new("A", "m").with_function(echo_request());
        let ctx = ContextVariables::from([("request".to_string(), "from ctx".to_string())]);

        let outcome = handle_tool_calls(
            &[call("c1", "echo", ""), call("c2", "echo", r#"{"request":"from model"}"#)],
            &agent,
            &ctx,
            &HashMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.messages[0].content, "from ctx");
        assert_eq!(outcome.messages[1].content, "from model");
    }

    #[tokio::test]
    async fn test_handoff_stops_batch() {
        let sales = Agent::new("Sales", "gpt-4o");
        let agent = Agent::new("Triage", "gpt-4o")
            .with_function(FunctionTool::handoff("to_sales", "", sales).into_arc())
            .with_function(echo_request());

        let outcome = handle_tool_calls(
            &[call("c1", "to_sales", "{}"), call("c2", "echo", "{}")],
            &agent,
            &ContextVariables::new(),
            &HashMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].content, r#"{"agent":"Sales"}"#);
        assert_eq!(outcome.handoff.unwrap().name, "Sales");
    }

    #[tokio::test]
    async fn test_named_transfer_resolution() {
        let agent = Agent::new("Triage", "gpt-4o")
            .with_function(transfer_tool("Refunds", "").into_arc());
        let args = r#"{"request":"refund me"}"#;

        let err = handle_tool_calls(
            &[call("c1", "transfer_to_refunds", args)],
            &agent,
            &ContextVariables::new(),
            &HashMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Target assistant not found: Refunds");

        let registry = HashMap::from([(
            "Refunds".to_string(),
            Agent::new("Refunds", "gpt-4o"),
        )]);
        let outcome = handle_tool_calls(
            &[call("c1", "transfer_to_refunds", args)],
            &agent,
            &ContextVariables::new(),
            &registry,
        )
        .await
        .unwrap();
        assert_eq!(outcome.handoff.unwrap().name, "Refunds");
        assert_eq!(outcome.context_variables["request"], "refund me");
    }

    #[tokio::test]
    async fn test_result_context_wins_over_target_context() {
        let sales = Agent::new("Sales", "gpt-4o")
            .with_context(json!({"tier": "bronze", "region": "north"}).as_object().unwrap().clone());
        let moving = FunctionTool::new("move", "", json!({}), move |_, _| {
            let sales = sales.clone();
            async move {
                Ok(FunctionResult::new("moving")
                    .with_agent(sales)
                    .with_context("tier", "gold"))
            }
        })
        .into_arc();
        let agent = Agent::new("Triage", "gpt-4o").with_function(moving);

        let outcome = handle_tool_calls(
            &[call("c1", "move", "{}")],
            &agent,
            &ContextVariables::new(),
            &HashMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.messages[0].content, "moving");
        assert_eq!(outcome.context_variables["tier"], "gold");
        assert!(!outcome.context_variables.contains_key("region"));
        assert_eq!(outcome.handoff.unwrap().name, "Sales");
    }

    #[tokio::test]
    async fn test_named_transfer_seeds_context_and_carries_history() {
        let agent = Agent::new("Triage", "gpt-4o")
            .with_function(transfer_tool("Refunds", "").into_arc());
        let refunds = Agent::new("Refunds", "gpt-4o").with_context(
            json!({"desk": "refunds", "request": "stale"}).as_object().unwrap().clone(),
        );
        let registry = HashMap::from([("Refunds".to_string(), refunds)]);
        let args = json!({
            "request": "refund order 7",
            "context": {"history": [{"role": "user", "content": "order 7 arrived broken"}]}
        })
        .to_string();

        let outcome = handle_tool_calls(
            &[call("c1", "transfer_to_refunds", &args)],
            &agent,
            &ContextVariables::new(),
            &registry,
        )
        .await
        .unwrap();
        assert_eq!(outcome.context_variables["desk"], "refunds");
        assert_eq!(outcome.context_variables["request"], "refund order 7");
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.messages[1].role, beeswarm_core::Role::User);
        assert_eq!(outcome.messages[1].content, "order 7 arrived broken");
    }

    #[tokio::test]
    async fn test_context_last_write_wins() {
        let set = |value: &'static str| {
            FunctionTool::new(format!("set_{value}"), "", json!({}), move |_, _| async move {
                Ok(FunctionResult::new("set").with_context("color", value))
            })
            .into_arc()
        };
        let agent = Agent::new("A", "m")
            .with_function(set("red"))
            .with_function(set("blue"));

        let outcome = handle_tool_calls(
            &[call("c1", "set_red", "{}"), call("c2", "set_blue", "{}")],
            &agent,
            &ContextVariables::from([("keep".to_string(), "me".to_string())]),
            &HashMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.context_variables["color"], "blue");
        assert_eq!(outcome.context_variables["keep"], "me");
    }

    #[tokio::test]
    async fn test_function_error_recovered_transfer_error_fatal() {
        let failing = FunctionTool::new("boom", "", json!({}), |_, _| async {
            Err::<String, _>(SwarmError::Tool("disk on fire".into()))
        })
        .into_arc();
        let agent = Agent::new("A", "m")
            .with_function(failing)
            .with_function(transfer_tool("B", "").into_arc());

        let outcome = handle_tool_calls(
            &[call("c1", "boom", "{}")],
            &agent,
            &ContextVariables::new(),
            &HashMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.messages[0].content, "Error: Tool error: disk on fire");

        let err = handle_tool_calls(
            &[call("c1", "transfer_to_b", r#"{"request": 1}"#)],
            &agent,
            &ContextVariables::new(),
            &HashMap::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            SwarmError::Transfer(TransferError::InvalidArguments(_))
        ));
    }
}
