//! Building blocks for agent functions.
//!
//! Explicit schemas ([`schema::FunctionSchema`]) with closure-backed
//! [`function::FunctionTool`]s, the [`swarm_fn!`] shortcut that infers a
//! schema from parameter names, and ready-made transfer functions.

pub mod function;
pub mod schema;
pub mod signature;
pub mod transfer;

pub use function::FunctionTool;
pub use schema::{FunctionSchema, ParamType, schema_from_params, strip_context_param};
pub use transfer::{transfer_tool, transfer_tool_name};

#[doc(hidden)]
pub mod __private {
    pub use beeswarm_core::{ContextVariables, FunctionOutput, SwarmError};
    pub use serde_json::{Map, Value};
}
