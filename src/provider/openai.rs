//! Delta-based chat-completion backend (OpenAI wire format, used by
//! DeepSeek and compatible endpoints).

use super::{parse_sse_field, strip_reasoning, SseLineBuffer, StreamChunk};
use crate::config::Config;
use crate::error::Result;
use crate::models::Message;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{timeout, Duration};

pub struct OpenAiBackend {
    api_key: String,
    base_url: String,
    model: String,
    stream_timeout: u64,
}

impl OpenAiBackend {
    pub fn new(config: &Config) -> Self {
        OpenAiBackend {
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            stream_timeout: config.stream_timeout,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }

    fn build_body(&self, messages: &[Message], tools: Option<&[Value]>) -> Value {
        let messages: Vec<Value> = strip_reasoning(messages)
            .iter()
            .map(translate_message)
            .collect();
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = Value::Array(tools.to_vec());
            }
        }
        body
    }
}

impl super::ChatBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn stream_chat(
        &self,
        messages: &[Message],
        tools: Option<&[Value]>,
    ) -> Result<UnboundedReceiver<StreamChunk>> {
        let body = self.build_body(messages, tools);

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|e| {
                crate::error::CoworkError::Other(format!("Invalid authorization header: {}", e))
            })?,
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
            if value == "[DONE]" {
                return;
            }
            let parsed: StreamResponse = match serde_json::from_str(value) {
                Ok(parsed) => parsed,
                Err(_) => continue, // tolerate malformed keep-alive frames
            };
            if !forward_deltas(parsed, &tx) {
                return;
            }
        }
    }
}

/// Returns false when the receiver is gone (turn stopped).
fn forward_deltas(parsed: StreamResponse, tx: &UnboundedSender<StreamChunk>) -> bool {
    for choice in parsed.choices.unwrap_or_default() {
        let delta = match choice.delta {
            Some(delta) => delta,
            None => continue,
        };
        // DeepSeek streams reasoning as `reasoning_content`; some
        // OpenAI-compatible endpoints use `reasoning`.
        if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning) {
            if !reasoning.is_empty() && tx.send(StreamChunk::Reasoning(reasoning)).is_err() {
                return false;
            }
        }
        if let Some(content) = delta.content {
            if !content.is_empty() && tx.send(StreamChunk::Content(content)).is_err() {
                return false;
            }
        }
        for tool_call in delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match tool_call.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            let chunk = StreamChunk::ToolCallDelta {
                index: tool_call.index.unwrap_or(0),
                id: tool_call.id,
                name,
                arguments,
            };
            if tx.send(chunk).is_err() {
                return false;
            }
        }
    }
    true
}

fn translate_message(message: &Message) -> Value {
    let mut value = json!({ "role": message.role });

    match &message.images {
        Some(images) if !images.is_empty() => {
            // Multi-part content: text plus image_url parts.
            let mut parts = Vec::new();
            if let Some(text) = &message.content {
                parts.push(json!({"type": "text", "text": text}));
            }
            for url in images {
                parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
            }
            value["content"] = Value::Array(parts);
        }
        _ => {
            value["content"] = match &message.content {
                Some(text) => Value::String(text.clone()),
                None => Value::String(String::new()),
            };
        }
    }

    if let Some(tool_calls) = &message.tool_calls {
        value["tool_calls"] = serde_json::to_value(tool_calls).unwrap_or(Value::Null);
    }
    if let Some(id) = &message.tool_call_id {
        value["tool_call_id"] = Value::String(id.clone());
    }

    value
}

#[derive(Deserialize)]
struct StreamResponse {
    choices: Option<Vec<Choice>>,
}

#[derive(Deserialize)]
struct Choice {
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
    reasoning: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Deserialize)]
struct DeltaToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<DeltaFunction>,
}

#[derive(Deserialize)]
struct DeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}
