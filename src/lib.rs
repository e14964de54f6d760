//! mcp-relay: a streaming tool-orchestration engine for chat agents.
//!
//! A [`turn::TurnDriver`] streams one model response from an
//! OpenAI-compatible endpoint, aggregates the tool calls in it, and routes
//! each call to the MCP session that owns the tool through a
//! [`registry::SessionRegistry`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use mcp_relay::prelude::*;
//!
//! # async fn example() -> mcp_relay::error::Result<()> {
//! let registry = Arc::new(SessionRegistry::new());
//! registry
//!     .register_all(&[StdioServer::new(
//!         "filesystem",
//!         "npx",
//!         vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into(), ".".into()],
//!     )])
//!     .await?;
//!
//! let driver = TurnDriver::builder()
//!     .provider(Arc::new(OpenAiCompatibleProvider::new(
//!         "https://router.huggingface.co/v1",
//!         std::env::var("HF_TOKEN").ok(),
//!     )))
//!     .registry(Arc::clone(&registry))
//!     .model("Qwen/Qwen2.5-72B-Instruct")
//!     .build();
//!
//! let mut transcript = vec![ConversationMessage::user("What files are here?")];
//! let mut events = driver.process_turn(&mut transcript, TurnOptions::default());
//! while let Some(event) = events.next().await {
//!     if let TurnEvent::ToolResult(message) = event? {
//!         println!("{}", message.content());
//!     }
//! }
//! drop(events);
//! registry.close_all().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod mcp;
pub mod prelude;
pub mod provider;
pub mod registry;
pub mod turn;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
