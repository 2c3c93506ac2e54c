//! Closure-backed agent functions.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

use beeswarm_core::{Agent, AgentFunction, ContextVariables, FunctionOutput, Result};

use crate::schema::schema_from_params;

type Handler = Arc<
    dyn Fn(Map<String, Value>, ContextVariables) -> BoxFuture<'static, Result<FunctionOutput>>
        + Send
        + Sync,
>;

/// An [`AgentFunction`] backed by an async closure.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    schema: Value,
    handler: Handler,
}

impl FunctionTool {
    pub fn new<F, Fut, O>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Map<String, Value>, ContextVariables) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        O: Into<FunctionOutput> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Arc::new(move |args, ctx| {
                let fut = handler(args, ctx);
                Box::pin(async move { fut.await.map(Into::into) })
            }),
        }
    }

    /// Function that hands control to `target`. Takes no parameters.
    pub fn handoff(
        name: impl Into<String>,
        description: impl Into<String>,
        target: Agent,
    ) -> Self {
        Self::new(name, description, schema_from_params(&[]), move |_, _| {
            let target = target.clone();
            async move { Ok(FunctionOutput::Handoff(target)) }
        })
    }

    pub fn into_arc(self) -> Arc<dyn AgentFunction> {
        Arc::new(self)
    }
}

impl fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AgentFunction for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn call(
        &self,
        args: Map<String, Value>,
        ctx: &ContextVariables,
    ) -> Result<FunctionOutput> {
        (self.handler)(args, ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FunctionSchema, ParamType};
    use beeswarm_core::FunctionResult;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_receives_args_and_context() {
        let tool = FunctionTool::new(
            "greet",
            "Greet someone",
            FunctionSchema::new()
                .required("name", ParamType::String, "")
                .build(),
            |args, ctx| async move {
                let name = args.get("name").and_then(Value::as_str).unwrap_or("?").to_string();
                let from = ctx.get("user").cloned().unwrap_or_default();
                Ok(format!("hello {name} from {from}"))
            },
        );

        let ctx = ContextVariables::from([("user".to_string(), "ada".to_string())]);
        let args = json!({"name": "bob"}).as_object().unwrap().clone();
        let out = tool.call(args, &ctx).await.unwrap();
        match out {
            FunctionOutput::Value(v) => assert_eq!(v, "hello bob from ada"),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handoff_function() {
        let sales = Agent::new("Sales", "gpt-4o");
        let tool = FunctionTool::handoff("transfer_to_sales", "Hand off to sales", sales);
        assert_eq!(tool.parameters_schema()["properties"], json!({}));

        let out = tool.call(Map::new(), &ContextVariables::new()).await.unwrap();
        assert!(matches!(out, FunctionOutput::Handoff(a) if a.name == "Sales"));
    }

    #[tokio::test]
    async fn test_result_output_passes_through() {
        let tool = FunctionTool::new("remember", "", json!({}), |_, _| async {
            Ok(FunctionResult::new("noted").with_context("user", "ada"))
        });
        let out = tool.call(Map::new(), &ContextVariables::new()).await.unwrap();
        match out {
            FunctionOutput::Result(r) => {
                assert_eq!(r.value, "noted");
                assert_eq!(r.context_variables["user"], "ada");
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
