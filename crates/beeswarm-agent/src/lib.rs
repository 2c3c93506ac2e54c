//! Agent orchestration: the tool-call dispatcher, the turn engine over chat
//! completions, and the thread engine over the stateful thread/run protocol.
//!
//! [`Swarm::run`] drives one agent through completion/tool turns until the
//! model stops calling tools or hands off. [`Swarm::run_and_stream`] does the
//! same while yielding [`StreamEvent`]s. [`ThreadEngine`] routes [`Task`]s to
//! provider-hosted [`Assistant`]s.

/// Per-turn trace line, promoted to `info` when the run's debug flag is set.
macro_rules! debug_print {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

pub mod assistant;
pub mod dispatcher;
pub mod engine;
pub mod stream;
pub mod task;
pub mod threads;

pub use assistant::Assistant;
pub use dispatcher::{Classified, DispatchOutcome, HandoffTarget, handle_tool_calls};
pub use engine::{RunOptions, Swarm};
pub use stream::{RunStream, StreamEvent};
pub use task::{EvaluationTask, Task, load_tasks, load_test_tasks};
pub use threads::{DeployReport, TaskReport, TaskRun, ThreadEngine};
