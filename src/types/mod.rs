//! Core types for mcp-relay.

pub mod message;
pub mod stream;
pub mod tool;
pub mod usage;

pub use message::*;
pub use stream::*;
pub use tool::*;
pub use usage::*;
