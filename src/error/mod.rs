//! Error types for mcp-relay.

use strum::Display;
use thiserror::Error;

/// Primary error type for all relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to connect to tool provider '{server}': {message}")]
    Connection { server: String, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error(transparent)]
    Arguments(#[from] ArgumentsError),

    #[error(
        "Failed to get a complete response from the model after {attempts} attempts. \
         Please check your network connection and try again."
    )]
    IncompleteResponse { attempts: u32 },

    #[error("Operation canceled")]
    Canceled,

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Failed to close {} tool provider session(s): {}", failures.len(), failures.join("; "))]
    SessionClose { failures: Vec<String> },

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl RelayError {
    /// Create an API error from a status code and body.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether this is a tool-argument payload that ended before it closed.
    ///
    /// This is the only failure the turn retry loop re-attempts.
    pub fn is_incomplete_arguments(&self) -> bool {
        matches!(
            self,
            Self::Arguments(ArgumentsError {
                kind: ArgumentsErrorKind::Incomplete,
                ..
            })
        )
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// How a tool call's accumulated argument string failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ArgumentsErrorKind {
    /// Input ended before the JSON value was closed (stream truncation).
    Incomplete,
    /// Syntactically or structurally malformed independent of truncation.
    Invalid,
}

/// Failure to parse the arguments of one streamed tool call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} JSON arguments for tool '{tool_name}' (call #{call_index}): {message}")]
pub struct ArgumentsError {
    pub call_index: u32,
    pub tool_name: String,
    pub kind: ArgumentsErrorKind,
    pub message: String,
}

impl ArgumentsError {
    /// Classify a `serde_json` failure on a tool call's argument string.
    pub fn from_json(call_index: u32, tool_name: impl Into<String>, error: &serde_json::Error) -> Self {
        let kind = match error.classify() {
            serde_json::error::Category::Eof => ArgumentsErrorKind::Incomplete,
            _ => ArgumentsErrorKind::Invalid,
        };
        Self {
            call_index,
            tool_name: tool_name.into(),
            kind,
            message: error.to_string(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RelayError>;
