//! Shared test helpers: a scripted chat provider and a mock tool session.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use mcp_relay::error::RelayError;
use mcp_relay::mcp::ProviderSession;
use mcp_relay::provider::{ChatRequest, ChatStreamProvider};
use mcp_relay::registry::SessionRegistry;
use mcp_relay::turn::{RetryPolicy, TurnDriver};
use mcp_relay::types::{ChunkStream, Role, StreamChunk, ToolDescriptor, ToolOutput};

/// One scripted model response.
pub struct Script {
    chunks: Vec<StreamChunk>,
    error: Option<RelayError>,
}

impl Script {
    pub fn new(chunks: Vec<StreamChunk>) -> Self {
        Self {
            chunks,
            error: None,
        }
    }

    /// Plain assistant text split into the given pieces.
    pub fn text(pieces: &[&str]) -> Self {
        let chunks = pieces
            .iter()
            .enumerate()
            .map(|(i, piece)| {
                let chunk = StreamChunk::text(*piece);
                if i == 0 {
                    chunk.with_role(Role::Assistant)
                } else {
                    chunk
                }
            })
            .collect();
        Self::new(chunks)
    }

    /// A single tool call whose arguments arrive in `fragments`.
    pub fn tool_call(index: u32, id: &str, name: &str, fragments: &[&str]) -> Self {
        let mut chunks = vec![StreamChunk::tool_call_start(index, id, name).with_role(Role::Assistant)];
        chunks.extend(
            fragments
                .iter()
                .map(|fragment| StreamChunk::tool_arguments(index, *fragment)),
        );
        Self::new(chunks)
    }

    pub fn then(mut self, chunk: StreamChunk) -> Self {
        self.chunks.push(chunk);
        self
    }

    /// Fail with `error` after the chunks.
    pub fn then_fail(mut self, error: RelayError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Provider that replays queued scripts, one per opened stream.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
    opens: AtomicUsize,
    pulled: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        })
    }

    /// Streams opened so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Chunks handed to the consumer across all streams.
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests lock should not be poisoned").clone()
    }
}

#[async_trait]
impl ChatStreamProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<ChunkStream, RelayError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("requests lock should not be poisoned")
            .push(request.clone());
        let script = self
            .scripts
            .lock()
            .expect("scripts lock should not be poisoned")
            .pop_front()
            .ok_or_else(|| RelayError::Stream("no scripted response left".into()))?;

        let pulled = Arc::clone(&self.pulled);
        let chunks = stream::iter(script.chunks.into_iter().map(Ok))
            .inspect(move |_| {
                pulled.fetch_add(1, Ordering::SeqCst);
            })
            .chain(stream::iter(script.error.map(Err)));
        Ok(chunks.boxed())
    }
}

/// How a [`MockSession`] answers one tool.
#[derive(Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
    /// Answer with text after a delay.
    Delayed(Duration, String),
}

/// In-memory tool provider.
pub struct MockSession {
    label: String,
    tools: Vec<ToolDescriptor>,
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
    closes: AtomicUsize,
}

impl MockSession {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            tools: Vec::new(),
            replies: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn tool(mut self, name: &str, reply: Reply) -> Self {
        self.tools.push(ToolDescriptor::new(
            name,
            format!("{name} tool"),
            serde_json::json!({ "type": "object", "properties": {} }),
        ));
        self.replies.insert(name.to_string(), reply);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().expect("calls lock should not be poisoned").clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderSession for MockSession {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, RelayError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, RelayError> {
        self.calls
            .lock()
            .expect("calls lock should not be poisoned")
            .push((name.to_string(), arguments));
        match self.replies.get(name).cloned() {
            Some(Reply::Text(text)) => Ok(ToolOutput::text(text)),
            Some(Reply::Fail(message)) => Err(RelayError::ToolExecution {
                tool_name: name.to_string(),
                message,
            }),
            Some(Reply::Delayed(delay, text)) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(RelayError::Canceled),
                    _ = tokio::time::sleep(delay) => Ok(ToolOutput::text(text)),
                }
            }
            None => Err(RelayError::ToolExecution {
                tool_name: name.to_string(),
                message: format!("unknown tool {name}"),
            }),
        }
    }

    async fn close(&self) -> Result<(), RelayError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Registry holding `sessions`, registered in order.
pub async fn registry_with(sessions: Vec<Arc<MockSession>>) -> Arc<SessionRegistry> {
    let registry = Arc::new(SessionRegistry::new());
    for session in sessions {
        registry
            .register_session(session)
            .await
            .expect("mock session should register");
    }
    registry
}

pub fn driver(
    provider: Arc<ScriptedProvider>,
    registry: Arc<SessionRegistry>,
    tool_concurrency: usize,
) -> TurnDriver {
    TurnDriver::builder()
        .provider(provider)
        .registry(registry)
        .model("test-model")
        .retry(RetryPolicy::new(3))
        .tool_concurrency(tool_concurrency)
        .build()
}
