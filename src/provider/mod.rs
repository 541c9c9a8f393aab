//! Backend adapters.
//!
//! Two backend families (a delta-based chat-completion stream and a
//! block-based message stream) are normalized into one chunk vocabulary.
//! A mid-stream failure becomes a single terminal `Error` chunk so the
//! turn can finish gracefully instead of unwinding.

mod anthropic;
mod openai;

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiBackend;

use crate::config::{Config, ProviderKind};
use crate::error::Result;
use crate::models::{Message, ToolCall};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc::UnboundedReceiver;

/// The normalized chunk vocabulary every backend speaks.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Reasoning(String),
    Content(String),
    /// One fragment of a tool call. `id` and `name` arrive only on the
    /// first chunk per index; `arguments` is always incremental text.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// Terminal: the stream failed. Exactly one per failed stream.
    Error(String),
}

/// A swappable model backend. `stream_chat` validates and builds the
/// outbound request synchronously (failures abort the request), then
/// streams normalized chunks from a background task.
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn stream_chat(
        &self,
        messages: &[Message],
        tools: Option<&[Value]>,
    ) -> Result<UnboundedReceiver<StreamChunk>>;
}

pub fn create_backend(config: &Config) -> Box<dyn ChatBackend> {
    match config.provider {
        ProviderKind::OpenAi => Box::new(OpenAiBackend::new(config)),
        ProviderKind::Anthropic => Box::new(AnthropicBackend::new(config)),
    }
}

/// Index-keyed tool-call accumulator: append-only argument buffers plus a
/// finalized flag. Pushing after finalization is a no-op.
#[derive(Default)]
pub struct ToolCallAccumulator {
    entries: BTreeMap<usize, PendingCall>,
    finalized: bool,
}

struct PendingCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: usize, id: Option<String>, name: Option<String>, arguments: &str) {
        if self.finalized {
            return;
        }
        let entry = self.entries.entry(index).or_insert(PendingCall {
            id: None,
            name: None,
            arguments: String::new(),
        });
        if entry.id.is_none() {
            entry.id = id;
        }
        if entry.name.is_none() {
            entry.name = name;
        }
        entry.arguments.push_str(arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Seal the accumulator and return the calls in index order.
    pub fn finalize(&mut self) -> Vec<ToolCall> {
        self.finalized = true;
        self.entries
            .iter()
            .filter_map(|(index, entry)| {
                let name = entry.name.clone()?;
                Some(ToolCall {
                    id: entry
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("call_{}", index)),
                    tool_type: "function".to_string(),
                    function: crate::models::FunctionCall {
                        name,
                        arguments: entry.arguments.clone(),
                    },
                })
            })
            .collect()
    }
}

/// Reassembles SSE lines from raw byte chunks; partial lines are held
/// until their newline arrives.
pub(crate) struct SseLineBuffer {
    incomplete: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        SseLineBuffer {
            incomplete: String::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.incomplete.push_str(&String::from_utf8_lossy(chunk));
        let mut lines = Vec::new();
        while let Some(pos) = self.incomplete.find('\n') {
            let line = self.incomplete[..pos].trim_end_matches('\r').to_string();
            self.incomplete.drain(..=pos);
            lines.push(line);
        }
        lines
    }
}

/// Parse one SSE line into (field, value); comments and blanks yield None.
pub(crate) fn parse_sse_field(line: &str) -> Option<(&str, &str)> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let colon_pos = line.find(':')?;
    Some((line[..colon_pos].trim(), line[colon_pos + 1..].trim_start()))
}

/// History cleanup shared by both backends: reasoning text is stripped
/// before re-sending to avoid redundant context cost.
pub(crate) fn strip_reasoning(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .map(|m| {
            let mut m = m.clone();
            m.reasoning = None;
            if m.tool_calls.as_ref().is_some_and(|tc| tc.is_empty()) {
                m.tool_calls = None;
            }
            m
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: {\"par").is_empty());
        let lines = buffer.push(b"tial\":1}\r\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"partial\":1}", "data: [DONE]"]);
    }

    #[test]
    fn sse_field_parsing() {
        assert_eq!(parse_sse_field("data: hello"), Some(("data", "hello")));
        assert_eq!(parse_sse_field("event:ping"), Some(("event", "ping")));
        assert_eq!(parse_sse_field(": keep-alive"), None);
        assert_eq!(parse_sse_field(""), None);
    }

    #[test]
    fn accumulator_orders_by_index_and_appends_arguments() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(1, Some("b".into()), Some("second".into()), "{}");
        acc.push(0, Some("a".into()), Some("first".into()), "{\"x\":");
        acc.push(0, None, None, "1}");
        let calls = acc.finalize();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "first");
        assert_eq!(calls[0].function.arguments, "{\"x\":1}");
        assert_eq!(calls[1].id, "b");
    }

    #[test]
    fn accumulator_ignores_pushes_after_finalize() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, Some("a".into()), Some("tool".into()), "{}");
        acc.finalize();
        acc.push(0, None, None, "extra");
        assert_eq!(acc.finalize()[0].function.arguments, "{}");
    }

    #[test]
    fn accumulator_keeps_first_id_and_name() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, Some("a".into()), Some("tool".into()), "");
        acc.push(0, Some("z".into()), Some("other".into()), "");
        let calls = acc.finalize();
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].function.name, "tool");
    }

    #[test]
    fn accumulator_skips_entries_without_a_name() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, None, None, "{\"orphan\":true}");
        acc.push(1, None, Some("named".into()), "{}");
        let calls = acc.finalize();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
    }

    #[test]
    fn strip_reasoning_clears_reasoning_and_empty_tool_call_lists() {
        let mut message = Message::assistant("hi");
        message.reasoning = Some("thinking".into());
        message.tool_calls = Some(vec![]);
        let stripped = strip_reasoning(&[message]);
        assert_eq!(stripped[0].reasoning, None);
        assert_eq!(stripped[0].tool_calls, None);
    }
}
