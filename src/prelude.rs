//! Convenience re-exports for common use.

pub use crate::config::RelayConfig;
pub use crate::error::{RelayError, Result};
pub use crate::mcp::{ProviderSession, SessionConnector};
#[cfg(feature = "mcp")]
pub use crate::mcp::{McpSession, StdioServer};
#[cfg(feature = "openai")]
pub use crate::provider::openai_compatible::OpenAiCompatibleProvider;
pub use crate::provider::{ChatRequest, ChatStreamProvider, SamplingSettings, ToolChoice};
pub use crate::registry::SessionRegistry;
pub use crate::turn::{RetryPolicy, TurnDriver, TurnEvent, TurnOptions};
pub use crate::types::{
    ConversationMessage, Role, StreamChunk, ToolCallRequest, ToolDescriptor, ToolOutput, Usage,
};
