//! Single-turn processing: stream aggregation, tool dispatch and retry.

pub mod aggregate;
pub mod dispatch;
pub mod driver;
pub mod retry;

pub use aggregate::{AggregateStep, AggregatedResponse, PendingToolCall, StreamAggregator};
pub use dispatch::{DispatchPlan, PlannedCall, ToolDispatcher};
pub use driver::{TurnDriver, TurnEvent, TurnOptions};
pub use retry::{AttemptState, RetryPolicy};
