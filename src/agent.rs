//! The turn loop: stream a model response, run any requested tools, feed
//! the results back, repeat until the model answers in plain text.
//!
//! Control is cooperative. Stop and pause are atomic flags checked on a
//! short polling interval around the stream, so a stop request lands
//! within one interval even mid-stream. Identical consecutive tool
//! requests trip a loop breaker before the model can burn a fourth round
//! on them.

use crate::events::{AgentEvent, EventSender, TurnOutcome};
use crate::gate::ConfirmationGate;
use crate::models::{Message, ToolCall};
use crate::provider::{ChatBackend, StreamChunk, ToolCallAccumulator};
use crate::skills::registry::{SkillRegistry, ToolContext};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A repeated tool signature is tolerated this many times before the
/// turn is cut off (the breaker fires on the next repeat).
const MAX_IDENTICAL_ROUNDS: u32 = 3;

/// Reasoning shorter than this never counts toward loop detection;
/// short acknowledgements repeat legitimately.
const MIN_REASONING_LOOP_LEN: usize = 20;

/// Shared stop/pause switches, cloneable across tasks.
#[derive(Clone, Default)]
pub struct ControlFlags {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Clear both switches before a new turn.
    pub fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }
}

pub struct Agent {
    backend: Box<dyn ChatBackend>,
    registry: SkillRegistry,
    gate: Arc<ConfirmationGate>,
    events: EventSender,
    flags: ControlFlags,
    workspace_dir: Option<PathBuf>,
    verbose: bool,
    /// Extra standing guidance appended to the system preamble.
    notes: Option<String>,
}

impl Agent {
    pub fn new(
        backend: Box<dyn ChatBackend>,
        registry: SkillRegistry,
        gate: Arc<ConfirmationGate>,
        events: EventSender,
        flags: ControlFlags,
        workspace_dir: Option<PathBuf>,
        verbose: bool,
    ) -> Self {
        Agent {
            backend,
            registry,
            gate,
            events,
            flags,
            workspace_dir,
            verbose,
            notes: None,
        }
    }

    pub fn set_notes(&mut self, notes: Option<String>) {
        self.notes = notes;
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    pub fn flags(&self) -> &ControlFlags {
        &self.flags
    }

    /// Run one user turn to completion. New assistant and tool messages are
    /// appended to `history`; the outcome is both returned and emitted as a
    /// `Finished` event.
    pub async fn run_turn(&mut self, history: &mut Vec<Message>) -> TurnOutcome {
        self.flags.reset();

        // Skills are rescanned only between turns, never mid-turn.
        if self.registry.changed_on_disk() {
            self.step("Reloading skills");
            self.registry.reload();
        }

        let system = Message::system(self.build_preamble());
        let tools = self.registry.tool_definitions();

        let mut loops = LoopBreaker::default();

        let outcome = loop {
            let mut request = Vec::with_capacity(history.len() + 1);
            request.push(system.clone());
            request.extend(history.iter().cloned());

            let tools_arg = if tools.is_empty() {
                None
            } else {
                Some(tools.as_slice())
            };
            let rx = match self.backend.stream_chat(&request, tools_arg) {
                Ok(rx) => rx,
                Err(e) => break TurnOutcome::BackendError(e.to_string()),
            };

            let round = match self.consume_stream(rx).await {
                Ok(round) => round,
                Err(stopped_or_error) => break stopped_or_error,
            };

            if round.tool_calls.is_empty() {
                history.push(assistant_message(&round, vec![]));
                break TurnOutcome::Finished {
                    content: round.content,
                    reasoning: round.reasoning,
                };
            }

            if loops.observe(&round) {
                history.push(assistant_message(&round, round.tool_calls.clone()));
                break TurnOutcome::LoopDetected;
            }

            history.push(assistant_message(&round, round.tool_calls.clone()));

            for call in &round.tool_calls {
                // Pause parks here too, not just at stream reads.
                while self.flags.is_paused() && !self.flags.is_stopped() {
                    sleep(POLL_INTERVAL).await;
                }
                if self.flags.is_stopped() {
                    break;
                }
                let result = self.dispatch(call).await;
                history.push(Message::tool_result(call.id.clone(), result));
            }

            if self.flags.is_stopped() {
                break TurnOutcome::Stopped;
            }
        };

        let _ = self.events.send(AgentEvent::Finished(outcome.clone()));
        outcome
    }

    /// Drain one model response. Err means the turn is over (stopped, or
    /// the backend reported a terminal error).
    async fn consume_stream(
        &self,
        mut rx: tokio::sync::mpsc::UnboundedReceiver<StreamChunk>,
    ) -> Result<Round, TurnOutcome> {
        let mut round = Round::default();
        let mut accumulator = ToolCallAccumulator::new();

        loop {
            if self.flags.is_stopped() {
                return Err(TurnOutcome::Stopped);
            }
            if self.flags.is_paused() {
                sleep(POLL_INTERVAL).await;
                continue;
            }

            let chunk = match timeout(POLL_INTERVAL, rx.recv()).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(_) => continue,
            };

            match chunk {
                StreamChunk::Reasoning(text) => {
                    round.reasoning.push_str(&text);
                    let _ = self.events.send(AgentEvent::Reasoning(text));
                }
                StreamChunk::Content(text) => {
                    round.content.push_str(&text);
                    let _ = self.events.send(AgentEvent::Content(text));
                }
                StreamChunk::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    accumulator.push(index, id, name, &arguments);
                }
                StreamChunk::Error(message) => {
                    return Err(TurnOutcome::BackendError(message));
                }
            }
        }

        round.tool_calls = accumulator.finalize();
        Ok(round)
    }

    async fn dispatch(&self, call: &ToolCall) -> String {
        let name = &call.function.name;
        let _ = self.events.send(AgentEvent::ToolCall {
            name: name.clone(),
            arguments: call.function.arguments.clone(),
        });
        if let Some(skill) = self.registry.skill_of_tool(name) {
            let _ = self.events.send(AgentEvent::SkillUsed(skill.to_string()));
        }

        let args: Value = if call.function.arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(&call.function.arguments) {
                Ok(args) => args,
                Err(e) => {
                    let result = format!("Error: tool arguments are not valid JSON: {}", e);
                    let _ = self.events.send(AgentEvent::ToolResult {
                        name: name.clone(),
                        result: result.clone(),
                    });
                    return result;
                }
            }
        };

        let ctx = ToolContext {
            workspace_dir: self.workspace_dir.as_deref(),
            events: Some(&self.events),
            gate: Some(&self.gate),
        };
        let result = self.registry.call_tool(name, &args, &ctx).await;

        let _ = self.events.send(AgentEvent::ToolResult {
            name: name.clone(),
            result: result.clone(),
        });
        result
    }

    fn build_preamble(&self) -> String {
        let workspace = self
            .workspace_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| "(not set)".to_string());

        let mut preamble = format!(
            "You are a capable coworker assistant.\n\
             Operating system: {os}\n\
             Current time: {date}\n\
             Workspace directory: {workspace}\n\n\
             When a task maps onto an available tool, call the tool instead of \
             describing the steps. Prefer small, verifiable tool calls over \
             large speculative ones. When you write Python code for the user to \
             run, put it in a single ```python fenced block.",
            os = std::env::consts::OS,
            date = crate::config::Config::current_date(),
            workspace = workspace,
        );

        if let Some(notes) = &self.notes {
            if !notes.is_empty() {
                preamble.push_str("\n\nStanding notes:\n");
                preamble.push_str(notes);
            }
        }

        let guidance = self.registry.system_guidance();
        if !guidance.is_empty() {
            preamble.push_str("\n\nSkill guidance:\n");
            preamble.push_str(&guidance);
        }

        preamble
    }

    fn step(&self, text: &str) {
        if self.verbose {
            let _ = self.events.send(AgentEvent::Step(text.to_string()));
        }
    }
}

/// One model response within a turn.
#[derive(Default)]
struct Round {
    content: String,
    reasoning: String,
    tool_calls: Vec<ToolCall>,
}

fn assistant_message(round: &Round, tool_calls: Vec<ToolCall>) -> Message {
    Message {
        role: "assistant".to_string(),
        content: if round.content.is_empty() {
            None
        } else {
            Some(round.content.clone())
        },
        reasoning: if round.reasoning.is_empty() {
            None
        } else {
            Some(round.reasoning.clone())
        },
        images: None,
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
    }
}

/// Detects a model stuck repeating itself across rounds. Tool-call
/// signatures and verbatim reasoning are counted independently; either
/// one repeating past the tolerance trips the breaker.
#[derive(Default)]
struct LoopBreaker {
    last_signature: Option<String>,
    signature_repeats: u32,
    last_reasoning: Option<String>,
    reasoning_repeats: u32,
}

impl LoopBreaker {
    /// Record one round; true means the breaker fired.
    fn observe(&mut self, round: &Round) -> bool {
        let signature = round_signature(round);
        if self.last_signature.as_deref() == Some(signature.as_str()) {
            self.signature_repeats += 1;
        } else {
            self.signature_repeats = 0;
            self.last_signature = Some(signature);
        }

        if round.reasoning.len() >= MIN_REASONING_LOOP_LEN {
            if self.last_reasoning.as_deref() == Some(round.reasoning.as_str()) {
                self.reasoning_repeats += 1;
            } else {
                self.reasoning_repeats = 0;
                self.last_reasoning = Some(round.reasoning.clone());
            }
        }

        self.signature_repeats >= MAX_IDENTICAL_ROUNDS
            || self.reasoning_repeats >= MAX_IDENTICAL_ROUNDS
    }
}

/// Order-insensitive fingerprint of a round's tool requests. Two rounds
/// with the same signature are asking for exactly the same work.
fn round_signature(round: &Round) -> String {
    let mut calls: Vec<String> = round
        .tool_calls
        .iter()
        .map(|c| {
            // Compare parsed arguments so key order and whitespace in the
            // raw text cannot make identical requests look different.
            let arguments: Value = serde_json::from_str(&c.function.arguments)
                .unwrap_or_else(|_| Value::String(c.function.arguments.clone()));
            json!({
                "name": c.function.name,
                "arguments": arguments,
            })
            .to_string()
        })
        .collect();
    calls.sort();
    calls.join(",")
}
