//! Block-event message-stream backend (Anthropic wire format).
//!
//! History is translated at request time: system messages fold into the
//! top-level `system` field, tool results ride as `tool_result` blocks in
//! user messages, and recorded tool calls become `tool_use` blocks with
//! their argument text parsed back into JSON.

use super::{parse_sse_field, strip_reasoning, SseLineBuffer, StreamChunk};
use crate::config::Config;
use crate::error::{CoworkError, Result};
use crate::models::Message;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{timeout, Duration};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    api_key: String,
    base_url: String,
    model: String,
    stream_timeout: u64,
    max_output_tokens: u32,
}

impl AnthropicBackend {
    pub fn new(config: &Config) -> Self {
        AnthropicBackend {
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            stream_timeout: config.stream_timeout,
            max_output_tokens: config.max_output_tokens,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1/messages") {
            base.to_string()
        } else {
            format!("{}/v1/messages", base)
        }
    }

    fn build_body(&self, messages: &[Message], tools: Option<&[Value]>) -> Result<Value> {
        let (system, translated) = translate_history(&strip_reasoning(messages))?;
        let mut body = json!({
            "model": self.model,
            "messages": translated,
            "max_tokens": self.max_output_tokens,
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system);
        }
        if let Some(tools) = tools {
            if !tools.is_empty() {
                let translated: Vec<Value> = tools.iter().map(translate_tool).collect();
                body["tools"] = Value::Array(translated);
            }
        }
        Ok(body)
    }
}

impl super::ChatBackend for AnthropicBackend {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn stream_chat(
        &self,
        messages: &[Message],
        tools: Option<&[Value]>,
    ) -> Result<UnboundedReceiver<StreamChunk>> {
        let body = self.build_body(messages, tools)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| CoworkError::Other(format!("Invalid api key header: {}", e)))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder().default_headers(headers).build()?;

        let endpoint = self.endpoint();
        let chunk_timeout = Duration::from_secs(self.stream_timeout);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            pump_stream(client, endpoint, body, chunk_timeout, tx).await;
        });

        Ok(rx)
    }
}

async fn pump_stream(
    client: reqwest::Client,
    endpoint: String,
    body: Value,
    chunk_timeout: Duration,
    tx: UnboundedSender<StreamChunk>,
) {
    let response = match client.post(&endpoint).json(&body).send().await {
        Ok(response) => response,
        Err(e) => {
            let _ = tx.send(StreamChunk::Error(format!("Request failed: {}", e)));
            return;
        }
    };

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let _ = tx.send(StreamChunk::Error(format!(
            "API error (status {}): {}",
            status, message
        )));
        return;
    }

    let mut stream = response.bytes_stream();
    let mut lines = SseLineBuffer::new();

    loop {
        let chunk = match timeout(chunk_timeout, stream.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => {
                let _ = tx.send(StreamChunk::Error(format!("Stream error: {}", e)));
                return;
            }
            Ok(None) => return,
            Err(_) => {
                let _ = tx.send(StreamChunk::Error(format!(
                    "Connection timeout - no data received for {} seconds",
                    chunk_timeout.as_secs()
                )));
                return;
            }
        };

        for line in lines.push(&chunk) {
            let (field, value) = match parse_sse_field(&line) {
                Some(parsed) => parsed,
                None => continue,
            };
            if field != "data" {
                continue;
            }
            let event: StreamEvent = match serde_json::from_str(value) {
                Ok(event) => event,
                Err(_) => continue,
            };
            match forward_event(event, &tx) {
                Flow::Continue => {}
                Flow::Done => return,
            }
        }
    }
}

enum Flow {
    Continue,
    Done,
}

fn forward_event(event: StreamEvent, tx: &UnboundedSender<StreamChunk>) -> Flow {
    match event.event_type.as_str() {
        "content_block_start" => {
            let index = event.index.unwrap_or(0);
            if let Some(block) = event.content_block {
                if block.block_type.as_deref() == Some("tool_use") {
                    // The opening event carries id and name; any pre-filled
                    // input is re-chunked as a single arguments fragment.
                    let arguments = match &block.input {
                        Some(input) if !is_empty_object(input) => input.to_string(),
                        _ => String::new(),
                    };
                    let chunk = StreamChunk::ToolCallDelta {
                        index,
                        id: block.id,
                        name: block.name,
                        arguments,
                    };
                    if tx.send(chunk).is_err() {
                        return Flow::Done;
                    }
                }
            }
        }
        "content_block_delta" => {
            let index = event.index.unwrap_or(0);
            if let Some(delta) = event.delta {
                let chunk = match delta.delta_type.as_deref() {
                    Some("text_delta") => delta.text.map(StreamChunk::Content),
                    Some("thinking_delta") => delta.thinking.map(StreamChunk::Reasoning),
                    Some("input_json_delta") => {
                        delta.partial_json.map(|arguments| StreamChunk::ToolCallDelta {
                            index,
                            id: None,
                            name: None,
                            arguments,
                        })
                    }
                    _ => None,
                };
                if let Some(chunk) = chunk {
                    if tx.send(chunk).is_err() {
                        return Flow::Done;
                    }
                }
            }
        }
        "message_stop" => return Flow::Done,
        "error" => {
            let message = event
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "Unknown stream error".to_string());
            let _ = tx.send(StreamChunk::Error(message));
            return Flow::Done;
        }
        _ => {}
    }
    Flow::Continue
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().map(|m| m.is_empty()).unwrap_or(false)
}

/// Split history into the system preamble and translated turn messages.
/// Consecutive tool results collapse into one user message, as the wire
/// format requires.
fn translate_history(messages: &[Message]) -> Result<(String, Vec<Value>)> {
    let mut system_parts: Vec<String> = Vec::new();
    let mut translated: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    for message in messages {
        if message.role == "system" {
            if let Some(text) = &message.content {
                system_parts.push(text.clone());
            }
            continue;
        }

        if message.role == "tool" {
            let id = message.tool_call_id.clone().unwrap_or_default();
            pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": id,
                "content": message.content.clone().unwrap_or_default(),
            }));
            continue;
        }

        if !pending_results.is_empty() {
            translated.push(json!({
                "role": "user",
                "content": std::mem::take(&mut pending_results),
            }));
        }

        match message.role.as_str() {
            "assistant" => translated.push(translate_assistant(message)?),
            _ => translated.push(translate_user(message)?),
        }
    }

    if !pending_results.is_empty() {
        translated.push(json!({
            "role": "user",
            "content": pending_results,
        }));
    }

    Ok((system_parts.join("\n\n"), translated))
}

fn translate_user(message: &Message) -> Result<Value> {
    let mut blocks: Vec<Value> = Vec::new();
    if let Some(images) = &message.images {
        for uri in images {
            blocks.push(image_block(uri)?);
        }
    }
    if let Some(text) = &message.content {
        if !text.is_empty() {
            blocks.push(json!({"type": "text", "text": text}));
        }
    }
    if blocks.is_empty() {
        blocks.push(json!({"type": "text", "text": ""}));
    }
    Ok(json!({"role": "user", "content": blocks}))
}

fn translate_assistant(message: &Message) -> Result<Value> {
    let mut blocks: Vec<Value> = Vec::new();
    if let Some(text) = &message.content {
        if !text.is_empty() {
            blocks.push(json!({"type": "text", "text": text}));
        }
    }
    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            let input: Value = if call.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|e| {
                    CoworkError::Other(format!(
                        "Recorded tool call '{}' has unparseable arguments: {}",
                        call.function.name, e
                    ))
                })?
            };
            blocks.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.function.name,
                "input": input,
            }));
        }
    }
    if blocks.is_empty() {
        blocks.push(json!({"type": "text", "text": ""}));
    }
    Ok(json!({"role": "assistant", "content": blocks}))
}

/// Decode a `data:<media type>;base64,<payload>` URI into an image block.
fn image_block(uri: &str) -> Result<Value> {
    let stripped = uri
        .strip_prefix("data:")
        .ok_or_else(|| CoworkError::Other("Image attachment is not a data URI".to_string()))?;
    let (media_type, data) = stripped
        .split_once(";base64,")
        .ok_or_else(|| CoworkError::Other("Image data URI is not base64-encoded".to_string()))?;
    Ok(json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": media_type,
            "data": data,
        }
    }))
}

/// Flatten an OpenAI-style function definition into the flat tool shape.
fn translate_tool(tool: &Value) -> Value {
    let function = tool.get("function").unwrap_or(tool);
    json!({
        "name": function.get("name").cloned().unwrap_or(Value::Null),
        "description": function.get("description").cloned().unwrap_or(Value::Null),
        "input_schema": function.get("parameters").cloned().unwrap_or(json!({"type": "object"})),
    })
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    index: Option<usize>,
    content_block: Option<ContentBlock>,
    delta: Option<BlockDelta>,
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<Value>,
}

#[derive(Deserialize)]
struct BlockDelta {
    #[serde(rename = "type")]
    delta_type: Option<String>,
    text: Option<String>,
    thinking: Option<String>,
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}
