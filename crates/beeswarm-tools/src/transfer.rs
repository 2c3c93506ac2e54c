//! Ready-made functions that transfer a conversation to a named agent.

use serde_json::{Map, Value};

use beeswarm_core::error::TransferError;
use beeswarm_core::{Message, Role, SwarmError, TransferRequest};

use crate::function::FunctionTool;
use crate::schema::{FunctionSchema, ParamType};

/// Arguments accepted by a transfer function.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferArgs {
    pub request: String,
    pub history: Vec<Message>,
}

/// Schema shared by every transfer function.
pub fn transfer_schema() -> Value {
    FunctionSchema::new()
        .required(
            "request",
            ParamType::String,
            "The user request to be transferred",
        )
        .optional(
            "context",
            ParamType::Object,
            "Additional context for the transfer",
        )
        .build()
}

/// `transfer_to_<target>` with the target lowercased and non-alphanumerics replaced by `_`.
pub fn transfer_tool_name(target: &str) -> String {
    let slug: String = target
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("transfer_to_{slug}")
}

/// Validate raw transfer arguments.
pub fn validate_transfer_args(value: &Value) -> Result<TransferArgs, TransferError> {
    let Value::Object(args) = value else {
        return Err(invalid("Arguments must be an object"));
    };

    let Some(request) = args.get("request").and_then(Value::as_str) else {
        return Err(invalid("Request must be a string"));
    };

    let history = match args.get("context") {
        None | Some(Value::Null) => Vec::new(),
        Some(context) => {
            let Some(items) = context.get("history").and_then(Value::as_array) else {
                return Err(invalid("Context history must be an array"));
            };
            items
                .iter()
                .enumerate()
                .map(|(index, item)| history_item(index, item))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(TransferArgs {
        request: request.to_string(),
        history,
    })
}

fn history_item(index: usize, item: &Value) -> Result<Message, TransferError> {
    let Value::Object(item) = item else {
        return Err(invalid(format!(
            "History item at index {index} must be an object"
        )));
    };
    let Some(role) = item.get("role").and_then(Value::as_str) else {
        return Err(invalid(format!(
            "History item at index {index} must have a string 'role'"
        )));
    };
    let Some(content) = item.get("content").and_then(Value::as_str) else {
        return Err(invalid(format!(
            "History item at index {index} must have a string 'content'"
        )));
    };
    let role: Role = serde_json::from_value(Value::String(role.to_string())).map_err(|_| {
        invalid(format!(
            "History item at index {index} has unknown role '{role}'"
        ))
    })?;
    Ok(Message::new(role, content))
}

fn invalid(msg: impl Into<String>) -> TransferError {
    TransferError::InvalidArguments(msg.into())
}

/// A function that transfers the conversation to `target` by name.
///
/// The engine resolves the name when the call returns; an unknown name is a
/// fatal [`TransferError::AssistantNotFound`].
pub fn transfer_tool(target: &str, description: &str) -> FunctionTool {
    let target = target.to_string();
    FunctionTool::new(
        transfer_tool_name(&target),
        description,
        transfer_schema(),
        move |args: Map<String, Value>, _| {
            let target = target.clone();
            async move {
                let TransferArgs { request, history } =
                    validate_transfer_args(&Value::Object(args))?;
                Ok::<_, SwarmError>(TransferRequest {
                    assistant: target,
                    request,
                    history,
                })
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use beeswarm_core::{AgentFunction, ContextVariables, FunctionOutput};
    use serde_json::json;

    fn err(value: Value) -> String {
        validate_transfer_args(&value).unwrap_err().to_string()
    }

    #[test]
    fn test_transfer_tool_name() {
        assert_eq!(transfer_tool_name("Sales"), "transfer_to_sales");
        assert_eq!(transfer_tool_name("Refund Desk"), "transfer_to_refund_desk");
    }

    #[test]
    fn test_validation_messages() {
        assert_eq!(
            err(json!("buy")),
            "Invalid transfer arguments: Arguments must be an object"
        );
        assert_eq!(
            err(json!({"request": 4})),
            "Invalid transfer arguments: Request must be a string"
        );
        assert_eq!(
            err(json!({"request": "x", "context": {}})),
            "Invalid transfer arguments: Context history must be an array"
        );
        assert_eq!(
            err(json!({"request": "x", "context": {"history": [{"role": "user", "content": "a"}, 3]}})),
            "Invalid transfer arguments: History item at index 1 must be an object"
        );
        assert!(
            err(json!({"request": "x", "context": {"history": [{"content": "a"}]}}))
                .contains("index 0 must have a string 'role'")
        );
        assert!(
            err(json!({"request": "x", "context": {"history": [{"role": "user"}]}}))
                .contains("index 0 must have a string 'content'")
        );
    }

    #[test]
    fn test_valid_args_with_history() {
        let args = validate_transfer_args(&json!({
            "request": "refund order 7",
            "context": {"history": [
                {"role": "user", "content": "my order broke"},
                {"role": "assistant", "content": "sorry to hear"}
            ]}
        }))
        .unwrap();
        assert_eq!(args.request, "refund order 7");
        assert_eq!(args.history.len(), 2);
        assert_eq!(args.history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_transfer_tool_yields_request() {
        let tool = transfer_tool("Sales", "Transfer to sales");
        assert_eq!(tool.name(), "transfer_to_sales");
        assert_eq!(tool.parameters_schema()["required"], json!(["request"]));

        let args = json!({"request": "buy bees"}).as_object().unwrap().clone();
        let out = tool.call(args, &ContextVariables::new()).await.unwrap();
        match out {
            FunctionOutput::Transfer(t) => {
                assert_eq!(t.assistant, "Sales");
                assert_eq!(t.request, "buy bees");
                assert!(t.history.is_empty());
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transfer_tool_invalid_args_error() {
        let tool = transfer_tool("Sales", "Transfer to sales");
        let args = json!({"request": false}).as_object().unwrap().clone();
        let err = tool.call(args, &ContextVariables::new()).await.unwrap_err();
        assert!(matches!(
            err,
            SwarmError::Transfer(TransferError::InvalidArguments(_))
        ));
    }
}
