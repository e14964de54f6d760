//! Streaming types.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::message::Role;
use super::usage::Usage;
use crate::error::RelayError;

/// Lazy, non-restartable sequence of chunks for one model response.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, RelayError>>;

/// One incremental unit of a streamed model response.
///
/// A chunk without a delta is a heartbeat and carries no content.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChunkDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Incremental content carried by a chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallFragment>,
}

/// A piece of an in-progress tool call.
///
/// `index` identifies the call for the whole stream; `id` and `name`
/// usually arrive once on the first fragment, `arguments` is split
/// arbitrarily across fragments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl StreamChunk {
    /// A chunk with no delta.
    pub fn heartbeat() -> Self {
        Self::default()
    }

    /// A chunk carrying only text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::from_delta(ChunkDelta {
            content: Some(text.into()),
            ..Default::default()
        })
    }

    /// First fragment of a tool call (id and name, no arguments yet).
    pub fn tool_call_start(index: u32, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::from_delta(ChunkDelta {
            tool_calls: vec![ToolCallFragment {
                index,
                id: Some(id.into()),
                name: Some(name.into()),
                arguments: None,
            }],
            ..Default::default()
        })
    }

    /// A fragment of a tool call's argument string.
    pub fn tool_arguments(index: u32, fragment: impl Into<String>) -> Self {
        Self::from_delta(ChunkDelta {
            tool_calls: vec![ToolCallFragment {
                index,
                arguments: Some(fragment.into()),
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    pub fn from_delta(delta: ChunkDelta) -> Self {
        Self {
            delta: Some(delta),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.delta.get_or_insert_with(ChunkDelta::default).role = Some(role);
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    /// Whether this chunk carries any tool-call fragment.
    pub fn has_tool_calls(&self) -> bool {
        self.delta
            .as_ref()
            .is_some_and(|delta| !delta.tool_calls.is_empty())
    }
}
