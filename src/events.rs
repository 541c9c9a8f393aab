//! One-way progress events from workers to the presentation layer.
//!
//! Every terminal turn outcome is delivered through the same channel,
//! tagged with its reason, so the presentation layer never inspects
//! runtime internals.

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Finished { content: String, reasoning: String },
    Stopped,
    LoopDetected,
    BackendError(String),
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Intermediate progress line.
    Step(String),
    /// Streamed reasoning delta.
    Reasoning(String),
    /// Streamed answer delta.
    Content(String),
    /// A skill's tool is about to run.
    SkillUsed(String),
    ToolCall { name: String, arguments: String },
    ToolResult { name: String, result: String },
    /// A worker is blocked on the confirmation gate.
    ConfirmationRequested(String),
    /// Executed code asked for a line of input.
    InputRequested(String),
    /// Output line from executed code.
    ExecOutput(String),
    Finished(TurnOutcome),
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<AgentEvent>;
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<AgentEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
