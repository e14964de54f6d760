//! Tool-provider sessions.
//!
//! [`ProviderSession`] and [`SessionConnector`] are the seams the registry
//! and the turn driver work against. With the `mcp` feature, [`McpSession`]
//! implements them over an rmcp client and [`StdioServer`] spawns local MCP
//! servers.

pub mod session;

#[cfg(feature = "mcp")]
pub mod client;
#[cfg(feature = "mcp")]
pub mod transport;

pub use session::{ProviderSession, SessionConnector};

#[cfg(feature = "mcp")]
pub use client::McpSession;
#[cfg(feature = "mcp")]
pub use transport::StdioServer;
