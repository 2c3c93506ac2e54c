//! Core entity model, config, errors, and transcripts for beeswarm.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod merge;
pub mod transcript;
pub mod types;

pub use agent::{
    Agent, AgentFunction, FunctionOutput, FunctionResult, Instructions, Response, ToolChoice,
    TransferRequest,
};
pub use context::ContextVariables;
pub use error::{Result, SwarmError, TransferError};
pub use types::{Message, Role, ToolCall, ToolInvocation};
