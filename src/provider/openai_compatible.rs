//! OpenAI-compatible Chat Completions streaming provider.
//!
//! Works against any endpoint that speaks the `/chat/completions` SSE
//! dialect (Hugging Face router, vLLM, Ollama, LM Studio, OpenAI itself).

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RelayError;
use crate::types::{
    ChunkDelta, ChunkStream, ConversationMessage, Role, StreamChunk, ToolCallFragment, Usage,
};

use super::http::{bearer_headers, parse_sse_data, shared_client, status_to_error, SseLineBuffer};
use super::{ChatRequest, ChatStreamProvider};

pub use crate::config::DEFAULT_BASE_URL;

pub struct OpenAiCompatibleProvider {
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let messages = request
            .messages
            .iter()
            .map(message_to_wire)
            .collect::<Vec<_>>();

        let mut body = serde_json::Map::new();
        body.insert("model".into(), request.model.clone().into());
        body.insert("messages".into(), messages.into());
        body.insert("stream".into(), true.into());

        if !request.tools.is_empty() {
            let tools = request
                .tools
                .iter()
                .map(|tool| tool.to_function_definition())
                .collect::<Vec<_>>();
            body.insert("tools".into(), tools.into());
            body.insert(
                "tool_choice".into(),
                request.tool_choice.to_string().into(),
            );
        }
        if let Some(max) = request.settings.max_tokens {
            body.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = request.settings.temperature {
            body.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = request.settings.top_p {
            body.insert("top_p".into(), top_p.into());
        }

        serde_json::Value::Object(body)
    }
}

#[async_trait]
impl ChatStreamProvider for OpenAiCompatibleProvider {
    fn provider_name(&self) -> &str {
        "openai-compatible"
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, RelayError> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "opening chat stream"
        );

        let send = shared_client()
            .post(&url)
            .headers(bearer_headers(self.api_key.as_deref()))
            .json(&body)
            .send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(RelayError::Canceled),
            resp = send => resp?,
        };

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut lines = SseLineBuffer::new();
            futures::pin_mut!(byte_stream);

            'read: loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = byte_stream.next() => next,
                };
                let Some(chunk_result) = next else {
                    if let Some(item) = lines.finish().and_then(|line| parse_stream_line(&line)) {
                        yield item;
                    }
                    break;
                };
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(RelayError::Network(e));
                        break;
                    }
                };

                for line in lines.push(&bytes) {
                    let Some(item) = parse_stream_line(&line) else {
                        continue;
                    };
                    let failed = item.is_err();
                    yield item;
                    if failed {
                        break 'read;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// One SSE line to a chunk, an endpoint error, or nothing.
fn parse_stream_line(line: &str) -> Option<Result<StreamChunk, RelayError>> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = parse_sse_data(line)?;
    match serde_json::from_str::<WireChunk>(data) {
        Ok(WireChunk {
            error: Some(error), ..
        }) => Some(Err(RelayError::Provider {
            provider: "openai-compatible".into(),
            message: wire_error_message(&error),
        })),
        Ok(wire) => Some(Ok(wire.into_chunk())),
        Err(e) => {
            debug!(error = %e, "skipping unparseable stream chunk");
            None
        }
    }
}

fn wire_error_message(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| error.to_string())
}

fn message_to_wire(message: &ConversationMessage) -> serde_json::Value {
    match message {
        ConversationMessage::System { content } => {
            serde_json::json!({ "role": "system", "content": content })
        }
        ConversationMessage::User { content } => {
            serde_json::json!({ "role": "user", "content": content })
        }
        ConversationMessage::Assistant {
            content,
            tool_calls,
        } => {
            if tool_calls.is_empty() {
                return serde_json::json!({ "role": "assistant", "content": content });
            }
            let calls = tool_calls
                .iter()
                .map(|call| {
                    serde_json::json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments,
                        }
                    })
                })
                .collect::<Vec<_>>();
            serde_json::json!({
                "role": "assistant",
                "content": content,
                "tool_calls": calls,
            })
        }
        ConversationMessage::Tool {
            tool_call_id,
            name,
            content,
        } => serde_json::json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "name": name,
            "content": content,
        }),
    }
}

// Wire types (streaming)

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCallDelta>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl WireChunk {
    fn into_chunk(self) -> StreamChunk {
        let usage = self.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        let (delta, finish_reason) = match self.choices.into_iter().next() {
            Some(choice) => (choice.delta.map(WireDelta::into_delta), choice.finish_reason),
            None => (None, None),
        };
        StreamChunk {
            id: self.id,
            delta,
            finish_reason,
            usage,
        }
    }
}

impl WireDelta {
    fn into_delta(self) -> ChunkDelta {
        ChunkDelta {
            role: self
                .role
                .filter(|role| !role.is_empty())
                .and_then(|role| role.parse::<Role>().ok()),
            content: self.content,
            tool_calls: self
                .tool_calls
                .into_iter()
                .map(|call| {
                    let (name, arguments) = match call.function {
                        Some(function) => (function.name, function.arguments),
                        None => (None, None),
                    };
                    ToolCallFragment {
                        index: call.index,
                        id: call.id.filter(|id| !id.is_empty()),
                        name: name.filter(|name| !name.is_empty()),
                        arguments,
                    }
                })
                .collect(),
        }
    }
}
