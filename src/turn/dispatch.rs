//! Tool-call dispatch against the session registry.

use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ArgumentsErrorKind, RelayError};
use crate::registry::SessionRegistry;
use crate::types::ConversationMessage;

use super::aggregate::PendingToolCall;

/// A call whose arguments parsed and that should go to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCall {
    pub call: PendingToolCall,
    pub arguments: serde_json::Value,
}

/// Calls to run for one turn, in call-index order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchPlan {
    pub calls: Vec<PlannedCall>,
    /// First exit-loop call, if any. Calls after it are dropped.
    pub exit_call: Option<PendingToolCall>,
}

impl DispatchPlan {
    /// Build the plan from the aggregated calls.
    ///
    /// Arguments that ended mid-value fail the whole plan with
    /// `RelayError::Arguments` so the attempt can be retried; arguments that
    /// are malformed otherwise only drop that call.
    pub fn build(
        calls: &[PendingToolCall],
        is_exit_tool: impl Fn(&str) -> bool,
    ) -> Result<Self, RelayError> {
        let mut plan = Self::default();
        for call in calls {
            let arguments = match call.parse_arguments() {
                Ok(arguments) => arguments,
                Err(e) if e.kind == ArgumentsErrorKind::Incomplete => return Err(e.into()),
                Err(e) => {
                    warn!(
                        tool = %call.tool_name(),
                        call_index = call.index,
                        arguments = %call.arguments,
                        error = %e,
                        "skipping tool call with malformed arguments"
                    );
                    continue;
                }
            };
            if is_exit_tool(call.tool_name()) {
                plan.exit_call = Some(call.clone());
                break;
            }
            plan.calls.push(PlannedCall {
                call: call.clone(),
                arguments,
            });
        }
        Ok(plan)
    }

    /// Calls that will produce a tool message, in order.
    pub fn answered_calls(&self) -> Vec<&PendingToolCall> {
        self.calls
            .iter()
            .map(|planned| &planned.call)
            .chain(self.exit_call.iter())
            .collect()
    }
}

/// Runs planned calls and turns each outcome into a tool message.
pub struct ToolDispatcher<'a> {
    registry: &'a SessionRegistry,
    concurrency: usize,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(registry: &'a SessionRegistry, concurrency: usize) -> Self {
        Self {
            registry,
            concurrency: concurrency.max(1),
        }
    }

    /// Tool messages in call-index order.
    ///
    /// Up to `concurrency` calls are in flight at once; each message is
    /// yielded as soon as it and every earlier one are ready.
    pub fn dispatch(
        &self,
        calls: Vec<PlannedCall>,
        cancel: CancellationToken,
    ) -> BoxStream<'_, Result<ConversationMessage, RelayError>> {
        stream::iter(calls)
            .map(move |planned| self.invoke(planned, cancel.clone()))
            .buffered(self.concurrency)
            .boxed()
    }

    async fn invoke(
        &self,
        planned: PlannedCall,
        cancel: CancellationToken,
    ) -> Result<ConversationMessage, RelayError> {
        if cancel.is_cancelled() {
            return Err(RelayError::Canceled);
        }

        let PlannedCall { call, arguments } = planned;
        let tool_name = call.tool_name().to_string();

        let content = match self.registry.resolve(&tool_name) {
            None => {
                warn!(tool = %tool_name, "no session registered for tool");
                format!("Error: No session found for tool: {tool_name}")
            }
            Some(session) => {
                debug!(tool = %tool_name, session = %session.label(), call_index = call.index, "calling tool");
                match session.call_tool(&tool_name, arguments, cancel).await {
                    Ok(output) => output.into_message_content(),
                    Err(RelayError::ToolExecution { message, .. }) => {
                        warn!(tool = %tool_name, error = %message, "tool execution failed");
                        format!("Error: {message}")
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        Ok(ConversationMessage::tool(call.call_id(), tool_name, content))
    }
}

/// Tool message for an exit-loop call; it carries no content.
pub fn exit_loop_message(call: &PendingToolCall) -> ConversationMessage {
    ConversationMessage::tool(call.call_id(), call.tool_name(), "")
}
