//! Streaming turn engine.
//!
//! A spawned producer runs the same loop as [`Swarm::run`] but folds each
//! completion from streamed deltas, forwarding every delta as it arrives.
//! Dropping the [`RunStream`] stops the producer at its next send.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use beeswarm_core::merge::merge_chunk;
use beeswarm_core::{Agent, ContextVariables, Message, Response, Result, SwarmError};

use crate::dispatcher::handle_tool_calls;
use crate::engine::{RunOptions, Swarm, TurnState};

const STREAM_BUFFER: usize = 64;

/// Events yielded by [`Swarm::run_and_stream`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A raw provider delta, tagged with the agent producing it.
    Delta { sender: String, delta: Value },
    /// The current assistant message is complete.
    EndOfMessage,
    /// Snapshot after a tool dispatch.
    Response(Response),
    /// Final result. Always the last event of a successful run.
    Completed(Response),
}

/// Stream of [`StreamEvent`]s from a running swarm.
pub struct RunStream {
    inner: ReceiverStream<Result<StreamEvent>>,
}

impl RunStream {
    /// Drain the stream and return the final [`Response`].
    pub async fn into_response(mut self) -> Result<Response> {
        while let Some(event) = self.inner.next().await {
            if let StreamEvent::Completed(response) = event? {
                return Ok(response);
            }
        }
        Err(SwarmError::Run(
            "stream closed before the run completed".into(),
        ))
    }
}

impl Stream for RunStream {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Why the producer stopped early.
enum Halt {
    /// The consumer dropped the stream.
    Closed,
    Failed(SwarmError),
}

impl From<SwarmError> for Halt {
    fn from(e: SwarmError) -> Self {
        Self::Failed(e)
    }
}

type Sender = mpsc::Sender<Result<StreamEvent>>;

async fn emit(tx: &Sender, event: StreamEvent) -> std::result::Result<(), Halt> {
    tx.send(Ok(event)).await.map_err(|_| Halt::Closed)
}

impl Swarm {
    /// Like [`Swarm::run`], yielding deltas, end-of-message markers and
    /// post-dispatch snapshots while the run progresses.
    ///
    /// Must be called within a tokio runtime.
    pub fn run_and_stream(
        &self,
        agent: &Agent,
        messages: Vec<Message>,
        context_variables: ContextVariables,
        opts: &RunOptions,
    ) -> RunStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let swarm = self.clone();
        let agent = agent.clone();
        let opts = opts.clone();

        tokio::spawn(async move {
            match swarm
                .produce(&agent, messages, context_variables, &opts, &tx)
                .await
            {
                Ok(()) => {}
                Err(Halt::Closed) => debug!(agent = %agent.name, "Stream consumer dropped"),
                Err(Halt::Failed(e)) => {
                    error!(agent = %agent.name, %e, "Streaming run failed");
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        RunStream {
            inner: ReceiverStream::new(rx),
        }
    }

    async fn produce(
        &self,
        agent: &Agent,
        messages: Vec<Message>,
        context_variables: ContextVariables,
        opts: &RunOptions,
        tx: &Sender,
    ) -> std::result::Result<(), Halt> {
        agent.validate()?;
        let mut state = TurnState::new(agent, messages, context_variables);

        while state.may_complete(opts.max_turns) {
            debug_print!(
                opts.debug,
                agent = %state.active.name,
                turn = state.turn,
                messages = state.history.len(),
                "Streaming chat completion"
            );

            let message = self.stream_message(&state, opts, tx).await?;
            emit(tx, StreamEvent::EndOfMessage).await?;

            if !state.push_completion(message, opts) {
                break;
            }

            let outcome = handle_tool_calls(
                state.pending_calls(),
                &state.active,
                &state.ctx,
                self.agents(),
            )
            .await?;
            let switched = state.apply_dispatch(outcome);
            emit(tx, StreamEvent::Response(state.snapshot())).await?;
            if switched {
                break;
            }
        }

        emit(tx, StreamEvent::Completed(state.into_response())).await
    }

    /// Stream one completion, forwarding deltas, and fold it into a message.
    async fn stream_message(
        &self,
        state: &TurnState,
        opts: &RunOptions,
        tx: &Sender,
    ) -> std::result::Result<Message, Halt> {
        let request = self.build_request(state, opts, true);
        let mut chunks = self.provider().stream(&request).await.map_err(provider_error)?;

        let sender = state.active.name.clone();
        let mut message = Map::new();
        let mut saw_choice = false;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(provider_error)?;
            for choice in chunk.choices {
                saw_choice = true;
                if choice.delta.is_null() {
                    continue;
                }
                merge_chunk(&mut message, &choice.delta);
                emit(
                    tx,
                    StreamEvent::Delta {
                        sender: sender.clone(),
                        delta: choice.delta,
                    },
                )
                .await?;
            }
        }

        if !saw_choice {
            return Err(SwarmError::MalformedResponse("stream produced no choices".into()).into());
        }

        message.insert("role".into(), json!("assistant"));
        Ok(Message::from_wire(&Value::Object(message))?.with_sender(sender))
    }
}

fn provider_error(e: anyhow::Error) -> SwarmError {
    error!("Provider stream error: {e:#}");
    SwarmError::Provider(format!("{e:#}"))
}
