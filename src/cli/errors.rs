//! User-facing error messages.

use crate::error::RelayError;

/// Map a [`RelayError`] to a message with a hint on what to do next.
pub fn format_error_help(err: &RelayError) -> String {
    match err {
        RelayError::Authentication(msg) => {
            format!("Authentication failed: {msg}. Set HF_TOKEN or MCP_RELAY_API_KEY.")
        }
        RelayError::Configuration(msg) => {
            format!("Configuration error: {msg}. Check your config file or .env.")
        }
        RelayError::Connection { server, message } => format!(
            "Could not start tool server '{server}': {message}. Check its command and args in the config."
        ),
        RelayError::RateLimited {
            retry_after_ms: Some(ms),
        } => format!("Rate limited by the model endpoint; retry in {}s.", ms.div_ceil(1000)),
        other => format!("{other}"),
    }
}
