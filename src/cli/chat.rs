//! Conversation loop: runs turns until the model stops calling tools.

use std::io::Write;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RelayError;
use crate::turn::{TurnDriver, TurnEvent, TurnOptions};
use crate::types::{ConversationMessage, ToolDescriptor};

use super::render::Renderer;

/// How a user message was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The last turn dispatched no tools.
    Answered,
    /// The model called this exit-loop tool.
    ExitTool(String),
    /// `max_turns` turns ran and the model was still calling tools.
    TurnLimit,
}

/// Owns the transcript across user messages.
pub struct ChatLoop {
    driver: TurnDriver,
    transcript: Vec<ConversationMessage>,
    max_turns: u32,
    exit_loop_tools: Vec<ToolDescriptor>,
    fast_exit: bool,
}

impl ChatLoop {
    pub fn new(driver: TurnDriver, max_turns: u32) -> Self {
        Self {
            driver,
            transcript: Vec::new(),
            max_turns: max_turns.max(1),
            exit_loop_tools: Vec::new(),
            fast_exit: false,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.transcript.push(ConversationMessage::system(prompt));
        self
    }

    pub fn with_exit_loop_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.exit_loop_tools = tools;
        self
    }

    /// Let follow-up turns stop at the first chunk that shows no tool call.
    pub fn with_fast_exit(mut self, fast_exit: bool) -> Self {
        self.fast_exit = fast_exit;
        self
    }

    pub fn driver(&self) -> &TurnDriver {
        &self.driver
    }

    pub fn transcript(&self) -> &[ConversationMessage] {
        &self.transcript
    }

    /// Add a user message and run turns until it is settled.
    pub async fn send<W: Write>(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
        renderer: &mut Renderer<W>,
    ) -> Result<LoopOutcome, RelayError> {
        self.transcript.push(ConversationMessage::user(input));

        for turn in 0..self.max_turns {
            let options = TurnOptions {
                cancel: cancel.clone(),
                exit_loop_tools: self.exit_loop_tools.clone(),
                exit_if_first_chunk_no_tool: self.fast_exit && turn > 0,
            };

            let mut tool_results = 0usize;
            let mut exit_tool = None;
            {
                let mut events = self.driver.process_turn(&mut self.transcript, options);
                while let Some(event) = events.next().await {
                    match event? {
                        TurnEvent::Chunk(chunk) => renderer.chunk(&chunk)?,
                        TurnEvent::ToolResult(message) => {
                            renderer.tool_result(&message)?;
                            tool_results += 1;
                            if let ConversationMessage::Tool { name, .. } = &message {
                                if self.exit_loop_tools.iter().any(|tool| &tool.name == name) {
                                    exit_tool = Some(name.clone());
                                }
                            }
                        }
                        TurnEvent::Retrying {
                            attempt,
                            max_attempts,
                        } => renderer.retrying(attempt, max_attempts)?,
                    }
                }
            }
            renderer.finish()?;
            debug!(turn, tool_results, transcript = self.transcript.len(), "turn settled");

            if let Some(name) = exit_tool {
                return Ok(LoopOutcome::ExitTool(name));
            }
            if tool_results == 0 {
                return Ok(LoopOutcome::Answered);
            }
        }

        Ok(LoopOutcome::TurnLimit)
    }
}
