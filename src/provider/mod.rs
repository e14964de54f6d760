//! Model streaming endpoint trait and implementations.

pub mod http;

#[cfg(feature = "openai")]
pub mod openai_compatible;

use async_trait::async_trait;
use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::types::{ChunkStream, ConversationMessage, ToolDescriptor};

/// How the model may use the offered tools.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

/// Sampling knobs forwarded to the endpoint.
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize, PartialEq)]
pub struct SamplingSettings {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

/// A request for one streamed model response.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ConversationMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub tool_choice: ToolChoice,
    pub settings: SamplingSettings,
}

/// A model endpoint that streams chat responses chunk by chunk.
///
/// Transport and authentication errors are returned unmodified; the turn
/// driver never retries them.
#[async_trait]
pub trait ChatStreamProvider: Send + Sync {
    /// Provider name used in logs (e.g., "openai-compatible").
    fn provider_name(&self) -> &str;

    /// Open a fresh stream for `request`. The stream should end early once
    /// `cancel` fires.
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, RelayError>;
}
