use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::accumulator::ToolCallAccumulator;
use crate::errors::{ToolError, ToolResult, TransportError, TurnError};
use crate::models::message::{Message, ToolCallRequest};
use crate::providers::factory::Adapter;
use crate::providers::utils::sanitize_function_name;
use crate::stream::ChunkReassembler;
use crate::systems::{ToolContext, ToolRegistry};
use crate::transport::Transport;

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 25;

/// Callbacks for one `send`. Exactly one of `on_complete` / `on_error` fires per
/// send that is not cancelled; a cancelled send fires neither.
pub trait TurnObserver: Send + Sync {
    /// Called with the whole answer so far each time new text arrives
    fn on_progress(&self, accumulated_text: &str);

    fn on_complete(&self, final_text: &str);

    fn on_error(&self, error: &TurnError);

    fn on_tool_call(&self, _call: &ToolCallRequest) {}

    fn on_tool_result(&self, _call: &ToolCallRequest, _result: &Value) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Completed(String),
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Streaming,
    Finalizing,
    ExecutingTools,
    Cancelled,
}

/// What one drained stream produced
#[derive(Debug, Default)]
struct StreamedReply {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
}

/// Why a sub-turn stopped early
enum Interrupt {
    Cancelled,
    Failed(TurnError),
}

impl From<TransportError> for Interrupt {
    fn from(err: TransportError) -> Self {
        Interrupt::Failed(err.into())
    }
}

impl From<anyhow::Error> for Interrupt {
    fn from(err: anyhow::Error) -> Self {
        Interrupt::Failed(err.into())
    }
}

/// The state machine of one `send`; the data each state needs rides along
enum Step {
    Streaming,
    ExecutingTools(StreamedReply),
    Finalizing(String),
    Cancelled,
    Failed(TurnError),
}

impl Step {
    fn phase(&self) -> TurnPhase {
        match self {
            Step::Streaming => TurnPhase::Streaming,
            Step::ExecutingTools(_) => TurnPhase::ExecutingTools,
            Step::Finalizing(_) => TurnPhase::Finalizing,
            Step::Cancelled => TurnPhase::Cancelled,
            Step::Failed(_) => TurnPhase::Idle,
        }
    }
}

struct ActiveTurn {
    id: u64,
    cancel: CancellationToken,
    phase: TurnPhase,
}

/// Agent drives one conversation against a backend: streams replies, runs the
/// tools the model asks for and resubmits until the model answers in text.
pub struct Agent {
    adapter: Adapter,
    transport: Arc<dyn Transport>,
    registry: Arc<dyn ToolRegistry>,
    max_tool_rounds: usize,
    active: Mutex<Option<ActiveTurn>>,
    next_turn_id: AtomicU64,
}

impl Agent {
    pub fn new(
        adapter: Adapter,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn ToolRegistry>,
    ) -> Self {
        Self {
            adapter,
            transport,
            registry,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            active: Mutex::new(None),
            next_turn_id: AtomicU64::new(0),
        }
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Phase of the send currently in flight, `Idle` when there is none
    pub fn phase(&self) -> TurnPhase {
        self.active_turn()
            .as_ref()
            .map(|turn| turn.phase)
            .unwrap_or(TurnPhase::Idle)
    }

    /// Cancel the send in flight, if any. The aborted send returns
    /// `SendOutcome::Cancelled` and leaves its history untouched.
    pub fn stop(&self) {
        if let Some(turn) = self.active_turn().as_mut() {
            tracing::info!(turn = turn.id, "stopping turn");
            turn.phase = TurnPhase::Cancelled;
            turn.cancel.cancel();
        }
    }

    /// Run one user-visible turn over `history`.
    ///
    /// On completion the history gains every tool round plus the final
    /// assistant message. A failure keeps the tool rounds that finished before
    /// it; a cancellation leaves the history exactly as it was.
    pub async fn send(&self, history: &mut Vec<Message>, observer: &dyn TurnObserver) -> SendOutcome {
        let (turn_id, cancel) = self.begin_turn();
        tracing::info!(turn = turn_id, messages = history.len(), "turn started");

        let outcome = self.drive(turn_id, history, observer, &cancel).await;

        self.end_turn(turn_id);
        tracing::info!(turn = turn_id, outcome = ?outcome, "turn finished");
        outcome
    }

    async fn drive(
        &self,
        turn_id: u64,
        history: &mut Vec<Message>,
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> SendOutcome {
        let mut working = history.clone();
        let mut committed = history.len();
        let mut rounds = 0;
        let mut step = Step::Streaming;

        loop {
            self.set_phase(turn_id, step.phase());
            step = match step {
                Step::Streaming => match self.stream_reply(&working, observer, cancel).await {
                    Ok(reply) if reply.tool_calls.is_empty() => Step::Finalizing(reply.text),
                    Ok(reply) => Step::ExecutingTools(reply),
                    Err(Interrupt::Cancelled) => Step::Cancelled,
                    Err(Interrupt::Failed(err)) => Step::Failed(err),
                },
                Step::ExecutingTools(reply) => {
                    rounds += 1;
                    if rounds > self.max_tool_rounds {
                        Step::Failed(TurnError::ToolRoundLimit(self.max_tool_rounds))
                    } else {
                        match self.execute_tools(&mut working, reply, observer, cancel).await {
                            Ok(()) => {
                                committed = working.len();
                                Step::Streaming
                            }
                            Err(Interrupt::Cancelled) => Step::Cancelled,
                            Err(Interrupt::Failed(err)) => Step::Failed(err),
                        }
                    }
                }
                Step::Finalizing(text) => {
                    working.push(Message::assistant().with_text(text.clone()));
                    *history = working;
                    observer.on_complete(&text);
                    return SendOutcome::Completed(text);
                }
                Step::Cancelled => return SendOutcome::Cancelled,
                Step::Failed(err) => {
                    tracing::error!(turn = turn_id, error = %err, "turn failed");
                    working.truncate(committed);
                    *history = working;
                    observer.on_error(&err);
                    return SendOutcome::Failed;
                }
            };
        }
    }

    /// Open one stream and drain it into text and finished tool calls
    async fn stream_reply(
        &self,
        history: &[Message],
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> Result<StreamedReply, Interrupt> {
        let tools = self.registry.definitions();
        let request = self.adapter.build_request(history, &tools)?;
        tracing::debug!(url = %request.url, "opening stream");

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
            opened = self.transport.open(request) => opened?,
        };

        let mut reassembler = ChunkReassembler::new(&self.adapter);
        let mut accumulator = ToolCallAccumulator::new();
        let mut reply = StreamedReply::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
                next = stream.next() => next,
            };

            let (decoded, exhausted) = match next {
                Some(Ok(bytes)) => (reassembler.push(&bytes), false),
                Some(Err(err)) => return Err(err.into()),
                None => (reassembler.finish(), true),
            };

            if let Some(message) = decoded.error {
                return Err(Interrupt::Failed(TurnError::Backend(message)));
            }
            if !decoded.text_delta.is_empty() {
                reply.text.push_str(&decoded.text_delta);
                observer.on_progress(&reply.text);
            }
            accumulator.absorb(decoded.tool_call_fragments);

            if decoded.is_end || exhausted {
                break;
            }
        }

        reply.tool_calls = accumulator.finalize();
        tracing::debug!(
            chars = reply.text.len(),
            tool_calls = reply.tool_calls.len(),
            "stream finished"
        );
        Ok(reply)
    }

    /// Run every requested tool in order and append the round to `working`.
    /// Nothing is appended unless the whole round finishes.
    async fn execute_tools(
        &self,
        working: &mut Vec<Message>,
        reply: StreamedReply,
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> Result<(), Interrupt> {
        let StreamedReply { text, tool_calls } = reply;

        let mut results = Vec::with_capacity(tool_calls.len());
        for call in &tool_calls {
            observer.on_tool_call(call);
            let context = ToolContext {
                call_id: call.id.clone(),
                cancel: cancel.clone(),
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
                outcome = self.dispatch_tool_call(call, &context) => outcome,
            };

            let payload = match outcome {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(tool = %call.name, id = %call.id, error = %err, "tool call failed");
                    err.to_payload()
                }
            };
            observer.on_tool_result(call, &payload);
            results.push(Message::tool_result(&call.id, &call.name, result_text(&payload)));
        }

        let mut assistant = Message::assistant().with_tool_calls(tool_calls);
        if !text.is_empty() {
            assistant = assistant.with_text(text);
        }
        working.push(assistant);
        working.extend(results);
        Ok(())
    }

    /// Dispatch a single tool call to its handler in the registry
    async fn dispatch_tool_call(
        &self,
        call: &ToolCallRequest,
        context: &ToolContext,
    ) -> ToolResult<Value> {
        let handler = self
            .registry
            .lookup(&call.name)
            .or_else(|| {
                // the wire only ever carries sanitized names
                self.registry
                    .definitions()
                    .into_iter()
                    .find(|tool| sanitize_function_name(&tool.name) == call.name)
                    .and_then(|tool| self.registry.lookup(&tool.name))
            })
            .ok_or_else(|| ToolError::ToolNotFound(call.name.clone()))?;

        let arguments = parse_arguments(&call.arguments)?;
        tracing::debug!(tool = %call.name, id = %call.id, "invoking tool");
        handler.call(arguments, context).await
    }

    fn active_turn(&self) -> MutexGuard<'_, Option<ActiveTurn>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new turn, cancelling whichever one was in flight
    fn begin_turn(&self) -> (u64, CancellationToken) {
        let id = self.next_turn_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let previous = self.active_turn().replace(ActiveTurn {
            id,
            cancel: cancel.clone(),
            phase: TurnPhase::Idle,
        });
        if let Some(previous) = previous {
            tracing::info!(turn = previous.id, "superseded by a new turn");
            previous.cancel.cancel();
        }
        (id, cancel)
    }

    fn end_turn(&self, id: u64) {
        let mut active = self.active_turn();
        if active.as_ref().is_some_and(|turn| turn.id == id) {
            *active = None;
        }
    }

    fn set_phase(&self, id: u64, phase: TurnPhase) {
        if let Some(turn) = self.active_turn().as_mut() {
            if turn.id == id && turn.phase != TurnPhase::Cancelled {
                turn.phase = phase;
            }
        }
    }
}

fn parse_arguments(raw: &str) -> ToolResult<Value> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err(ToolError::InvalidParameters(format!(
            "Tool arguments must be a JSON object, got: {}",
            raw
        ))),
        Err(err) => Err(ToolError::InvalidParameters(format!(
            "Could not parse tool arguments ({}): {}",
            err, raw
        ))),
    }
}

/// Text content of a tool-result message; plain strings are passed through as is
fn result_text(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
