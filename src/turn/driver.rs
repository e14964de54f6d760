//! Turn driver: one streamed model response plus the tool calls it requests.

use std::collections::HashSet;
use std::sync::Arc;

use bon::Builder;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::RelayError;
use crate::provider::{ChatRequest, ChatStreamProvider, SamplingSettings, ToolChoice};
use crate::registry::SessionRegistry;
use crate::types::{ConversationMessage, StreamChunk, ToolDescriptor};

use super::aggregate::{AggregateStep, StreamAggregator};
use super::dispatch::{exit_loop_message, DispatchPlan, ToolDispatcher};
use super::retry::{AttemptState, RetryPolicy};

/// Something the caller observes while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// A raw chunk, re-emitted unchanged for live display.
    Chunk(StreamChunk),
    /// A finished tool message, in call-index order.
    ToolResult(ConversationMessage),
    /// The previous attempt was discarded; a fresh stream is being opened.
    /// Chunks shown since the last `Retrying` (or turn start) are void.
    Retrying { attempt: u32, max_attempts: u32 },
}

/// Per-turn knobs.
#[derive(Debug, Clone, Default, Builder)]
pub struct TurnOptions {
    #[builder(default)]
    pub cancel: CancellationToken,
    /// Tools offered to the model that end the turn instead of running.
    #[builder(default)]
    pub exit_loop_tools: Vec<ToolDescriptor>,
    /// Stop reading once the first chunks show no tool call.
    #[builder(default)]
    pub exit_if_first_chunk_no_tool: bool,
}

/// Runs single turns against a model endpoint and the session registry.
#[derive(Builder)]
pub struct TurnDriver {
    provider: Arc<dyn ChatStreamProvider>,
    registry: Arc<SessionRegistry>,
    #[builder(into)]
    model: String,
    #[builder(default)]
    settings: SamplingSettings,
    #[builder(default)]
    retry: RetryPolicy,
    #[builder(default = 1)]
    tool_concurrency: usize,
}

impl TurnDriver {
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Tools offered for a turn: exit-loop tools first, then the catalog.
    fn offered_tools(&self, exit_loop_tools: &[ToolDescriptor]) -> Vec<ToolDescriptor> {
        let exit_names = exit_loop_tools
            .iter()
            .map(|tool| tool.name.as_str())
            .collect::<HashSet<_>>();
        let mut tools = exit_loop_tools.to_vec();
        tools.extend(
            self.registry
                .catalog()
                .into_iter()
                .filter(|tool| !exit_names.contains(tool.name.as_str())),
        );
        tools
    }

    /// Run one turn over `transcript`.
    ///
    /// The returned stream yields every chunk and every tool message as they
    /// become available. When the turn completes, the assistant message and
    /// its tool messages are appended to `transcript`; an early exit, a
    /// cancellation, or any error leaves `transcript` untouched.
    pub fn process_turn<'a>(
        &'a self,
        transcript: &'a mut Vec<ConversationMessage>,
        options: TurnOptions,
    ) -> BoxStream<'a, Result<TurnEvent, RelayError>> {
        Box::pin(async_stream::try_stream! {
            let turn_id = Uuid::new_v4();
            let TurnOptions {
                cancel,
                exit_loop_tools,
                exit_if_first_chunk_no_tool,
            } = options;
            let exit_names = exit_loop_tools
                .iter()
                .map(|tool| tool.name.clone())
                .collect::<HashSet<_>>();

            let request = ChatRequest {
                model: self.model.clone(),
                messages: transcript.clone(),
                tools: self.offered_tools(&exit_loop_tools),
                tool_choice: ToolChoice::Auto,
                settings: self.settings.clone(),
            };
            debug!(
                turn_id = %turn_id,
                provider = self.provider.provider_name(),
                messages = request.messages.len(),
                tools = request.tools.len(),
                "starting turn"
            );

            let mut state = AttemptState::Attempting(1);
            let mut committed: Option<Vec<ConversationMessage>> = None;

            'attempts: while let AttemptState::Attempting(attempt) = state {
                if attempt > 1 {
                    yield TurnEvent::Retrying {
                        attempt,
                        max_attempts: self.retry.max_attempts,
                    };
                    if !self.retry.delay.is_zero() {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }

                let mut chunks = match self.provider.stream_chat(&request, cancel.clone()).await {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        state = self.retry.on_failure(attempt, e);
                        continue 'attempts;
                    }
                };

                let mut aggregator = StreamAggregator::new(exit_if_first_chunk_no_tool);
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            state = AttemptState::Fatal(RelayError::Canceled);
                            continue 'attempts;
                        }
                        next = chunks.next() => next,
                    };
                    let Some(next) = next else {
                        break;
                    };
                    let chunk = match next {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            state = self.retry.on_failure(attempt, e);
                            continue 'attempts;
                        }
                    };
                    let step = aggregator.push(&chunk);
                    yield TurnEvent::Chunk(chunk);
                    if step == AggregateStep::EarlyExit {
                        debug!(turn_id = %turn_id, chunks = aggregator.chunks_seen(), "no tool call in opening chunks; ending turn early");
                        state = AttemptState::Done;
                        continue 'attempts;
                    }
                }
                drop(chunks);

                if cancel.is_cancelled() {
                    state = AttemptState::Fatal(RelayError::Canceled);
                    continue 'attempts;
                }

                let response = aggregator.finish();
                let plan = match DispatchPlan::build(&response.calls, |name| exit_names.contains(name)) {
                    Ok(plan) => plan,
                    Err(e) => {
                        state = self.retry.on_failure(attempt, e);
                        continue 'attempts;
                    }
                };

                let mut staged = vec![response.assistant_message(&plan.answered_calls())];
                let DispatchPlan { calls, exit_call } = plan;
                debug!(turn_id = %turn_id, attempt, calls = calls.len(), "dispatching tool calls");

                let dispatcher = ToolDispatcher::new(&self.registry, self.tool_concurrency);
                let mut results = dispatcher.dispatch(calls, cancel.clone());
                let mut failure = None;
                while let Some(result) = results.next().await {
                    match result {
                        Ok(message) => {
                            staged.push(message.clone());
                            yield TurnEvent::ToolResult(message);
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                drop(results);
                if let Some(e) = failure {
                    state = self.retry.on_failure(attempt, e);
                    continue 'attempts;
                }

                if let Some(exit_call) = exit_call {
                    info!(turn_id = %turn_id, tool = %exit_call.tool_name(), "exit-loop tool called");
                    let message = exit_loop_message(&exit_call);
                    staged.push(message.clone());
                    yield TurnEvent::ToolResult(message);
                }

                committed = Some(staged);
                state = AttemptState::Done;
            }

            if let AttemptState::Fatal(e) = state {
                if e.is_canceled() {
                    info!(turn_id = %turn_id, "turn canceled");
                } else {
                    error!(turn_id = %turn_id, error = %e, "turn failed");
                }
                Err::<(), RelayError>(e)?;
            } else if let Some(messages) = committed {
                debug!(turn_id = %turn_id, appended = messages.len(), "turn complete");
                transcript.extend(messages);
            }
        })
    }
}
