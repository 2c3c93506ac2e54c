//! Quick-prototype functions whose schema is inferred from their parameter list.
//!
//! ```ignore
//! let weather = swarm_fn!("Get the weather", fn get_weather(location) {
//!     format!("{{\"location\": \"{location}\", \"temp\": 67}}")
//! });
//!
//! let greet = swarm_fn!("Greet the user", fn greet(greeting; ctx) {
//!     format!("{greeting}, {}", ctx.get("name").cloned().unwrap_or_default())
//! });
//! ```
//!
//! Every parameter is a required string. Functions that need typed,
//! optional or nested parameters should use [`crate::schema::FunctionSchema`]
//! with [`crate::function::FunctionTool`] instead.

use serde_json::{Map, Value};

/// Read a parameter as a string. Missing or null is empty; non-strings are JSON text.
pub fn string_arg(args: &Map<String, Value>, name: &str) -> String {
    match args.get(name) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Build a [`FunctionTool`](crate::function::FunctionTool) from a function-like declaration.
///
/// The body may `.await` and use `?` on [`beeswarm_core::Result`]; its value is
/// converted with `FunctionOutput::from`. An optional `; ctx` binding exposes
/// the context variables as `&ContextVariables`.
#[macro_export]
macro_rules! swarm_fn {
    ($desc:expr, fn $name:ident($($param:ident),* $(,)?) $body:block) => {
        $crate::swarm_fn!(@build $desc, $name, [$($param),*], __swarm_ctx, $body)
    };
    ($desc:expr, fn $name:ident($($param:ident),* ; $ctx:ident) $body:block) => {
        $crate::swarm_fn!(@build $desc, $name, [$($param),*], $ctx, $body)
    };
    (@build $desc:expr, $name:ident, [$($param:ident),*], $ctx:ident, $body:block) => {
        $crate::function::FunctionTool::new(
            stringify!($name),
            $desc,
            $crate::schema::schema_from_params(&[$(stringify!($param)),*]),
            move |__swarm_args: $crate::__private::Map<String, $crate::__private::Value>,
                  __swarm_vars: $crate::__private::ContextVariables| {
                async move {
                    $(
                        #[allow(unused_variables)]
                        let $param: String = $crate::signature::string_arg(&__swarm_args, stringify!($param));
                    )*
                    #[allow(unused_variables)]
                    let $ctx: &$crate::__private::ContextVariables = &__swarm_vars;
                    let __swarm_out = $body;
                    ::std::result::Result::Ok::<_, $crate::__private::SwarmError>(
                        $crate::__private::FunctionOutput::from(__swarm_out),
                    )
                }
            },
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use beeswarm_core::{Agent, AgentFunction, ContextVariables, FunctionOutput};
    use serde_json::json;

    #[test]
    fn test_string_arg() {
        let args = json!({"a": "x", "n": 3, "z": null}).as_object().unwrap().clone();
        assert_eq!(string_arg(&args, "a"), "x");
        assert_eq!(string_arg(&args, "n"), "3");
        assert_eq!(string_arg(&args, "z"), "");
        assert_eq!(string_arg(&args, "missing"), "");
    }

    #[tokio::test]
    async fn test_inferred_schema_and_call() {
        let tool = crate::swarm_fn!("Get the weather", fn get_weather(location, unit) {
            format!("{location}:{unit}")
        });
        assert_eq!(tool.name(), "get_weather");
        assert_eq!(tool.description(), "Get the weather");

        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], json!(["location", "unit"]));
        assert_eq!(schema["properties"]["unit"]["type"], "string");

        let args = json!({"location": "Oslo", "unit": "C"}).as_object().unwrap().clone();
        let out = tool.call(args, &ContextVariables::new()).await.unwrap();
        assert!(matches!(out, FunctionOutput::Value(v) if v == "Oslo:C"));
    }

    #[tokio::test]
    async fn test_context_binding() {
        let tool = crate::swarm_fn!("Greet", fn greet(greeting; vars) {
            format!("{greeting}, {}", vars.get("name").cloned().unwrap_or_default())
        });
        assert_eq!(tool.parameters_schema()["required"], json!(["greeting"]));

        let ctx = ContextVariables::from([("name".to_string(), "Ada".to_string())]);
        let args = json!({"greeting": "Hi"}).as_object().unwrap().clone();
        let out = tool.call(args, &ctx).await.unwrap();
        assert!(matches!(out, FunctionOutput::Value(v) if v == "Hi, Ada"));
    }

    #[tokio::test]
    async fn test_no_params_handoff() {
        let tool = crate::swarm_fn!("Go to sales", fn transfer_to_sales() {
            Agent::new("Sales", "gpt-4o")
        });
        let out = tool.call(Default::default(), &ContextVariables::new()).await.unwrap();
        assert!(matches!(out, FunctionOutput::Handoff(a) if a.name == "Sales"));
    }
}
