//! Incremental reconstruction of one streamed assistant response.

use std::collections::BTreeMap;

use crate::error::ArgumentsError;
use crate::types::{ConversationMessage, Role, StreamChunk, ToolCallRequest};

/// Accumulator for one tool call, keyed by its call index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingToolCall {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

impl PendingToolCall {
    fn new(index: u32) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    /// Call id, or a synthesized `call_<index>` when the stream never sent one.
    pub fn call_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("call_{}", self.index))
    }

    /// Tool name, or `unknown` when the stream never sent one.
    pub fn tool_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown")
    }

    /// Parse the accumulated argument string. An empty string is `{}`.
    pub fn parse_arguments(&self) -> Result<serde_json::Value, ArgumentsError> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
            .map_err(|e| ArgumentsError::from_json(self.index, self.tool_name(), &e))
    }

    pub fn to_request(&self) -> ToolCallRequest {
        ToolCallRequest {
            id: self.call_id(),
            name: self.tool_name().to_string(),
            arguments: self.arguments.clone(),
        }
    }
}

/// What the caller should do after feeding a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateStep {
    Continue,
    /// Early-exit policy fired: stop reading the stream.
    EarlyExit,
}

/// Everything reconstructed from a completed stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedResponse {
    pub role: Option<Role>,
    pub content: String,
    /// Pending calls in ascending call-index order.
    pub calls: Vec<PendingToolCall>,
}

impl AggregatedResponse {
    /// Assistant message carrying `calls` as its tool-call requests.
    pub fn assistant_message(&self, calls: &[&PendingToolCall]) -> ConversationMessage {
        ConversationMessage::Assistant {
            content: self.content.clone(),
            tool_calls: calls.iter().map(|call| call.to_request()).collect(),
        }
    }
}

/// Merges chunks into the assistant text and the pending tool-call table.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    early_exit: bool,
    chunks_seen: usize,
    role: Option<Role>,
    content: String,
    calls: BTreeMap<u32, PendingToolCall>,
}

impl StreamAggregator {
    /// `early_exit` enables "stop if the first chunks carry no tool call".
    pub fn new(early_exit: bool) -> Self {
        Self {
            early_exit,
            ..Default::default()
        }
    }

    pub fn chunks_seen(&self) -> usize {
        self.chunks_seen
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    /// Merge one chunk.
    pub fn push(&mut self, chunk: &StreamChunk) -> AggregateStep {
        self.chunks_seen += 1;

        let Some(delta) = chunk.delta.as_ref() else {
            return AggregateStep::Continue;
        };

        if self.role.is_none() {
            self.role = delta.role;
        }
        if let Some(text) = delta.content.as_deref() {
            self.content.push_str(text);
        }

        for fragment in &delta.tool_calls {
            let call = self
                .calls
                .entry(fragment.index)
                .or_insert_with(|| PendingToolCall::new(fragment.index));
            if call.id.is_none() {
                call.id = fragment.id.clone().filter(|id| !id.is_empty());
            }
            if call.name.is_none() {
                call.name = fragment.name.clone().filter(|name| !name.is_empty());
            }
            if let Some(arguments) = fragment.arguments.as_deref() {
                call.arguments.push_str(arguments);
            }
        }

        if self.early_exit && self.chunks_seen <= 2 && self.calls.is_empty() {
            return AggregateStep::EarlyExit;
        }
        AggregateStep::Continue
    }

    pub fn finish(self) -> AggregatedResponse {
        AggregatedResponse {
            role: self.role,
            content: self.content,
            calls: self.calls.into_values().collect(),
        }
    }
}
