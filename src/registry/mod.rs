//! Session registry: routes tool names to the provider session that owns them.
//!
//! Sessions live in an arena addressed by [`SessionId`]; the routing index and
//! the aggregated catalog sit behind the same lock so each provider's tools
//! are published in a single write.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::mcp::{ProviderSession, SessionConnector};
use crate::types::ToolDescriptor;

/// Position of a session in the registry arena.
pub type SessionId = usize;

#[derive(Default)]
struct RegistryState {
    sessions: Vec<Arc<dyn ProviderSession>>,
    routes: HashMap<String, SessionId>,
    catalog: Vec<ToolDescriptor>,
    catalog_index: HashMap<String, usize>,
}

/// Owns every connected provider session for the life of the agent.
#[derive(Default)]
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect through `connector`, list its tools and publish them.
    ///
    /// Either every tool of the provider is published or none is. Any
    /// failure before publishing is reported as `RelayError::Connection`.
    pub async fn register(&self, connector: &dyn SessionConnector) -> Result<SessionId, RelayError> {
        let (session, tools) = connect_and_list(connector).await?;
        Ok(self.publish(session, tools))
    }

    /// List the tools of an already-connected session and publish them.
    pub async fn register_session(
        &self,
        session: Arc<dyn ProviderSession>,
    ) -> Result<SessionId, RelayError> {
        let tools = session
            .list_tools()
            .await
            .map_err(|e| connection_error(session.label(), e))?;
        Ok(self.publish(session, tools))
    }

    /// Register several providers concurrently.
    ///
    /// Connections run in parallel; publishing happens in input order, so a
    /// later connector wins a tool-name collision. Providers that connected
    /// stay registered (and closable) even when another one failed; the first
    /// failure in input order is returned.
    pub async fn register_all<C>(&self, connectors: &[C]) -> Result<Vec<SessionId>, RelayError>
    where
        C: SessionConnector,
    {
        let results = join_all(
            connectors
                .iter()
                .map(|connector| connect_and_list(connector as &dyn SessionConnector)),
        )
        .await;

        let mut ids = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok((session, tools)) => ids.push(self.publish(session, tools)),
                Err(e) => {
                    warn!(error = %e, "tool provider registration failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(ids),
        }
    }

    fn publish(&self, session: Arc<dyn ProviderSession>, tools: Vec<ToolDescriptor>) -> SessionId {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let id = state.sessions.len();
        let label = session.label().to_string();
        state.sessions.push(session);

        let tool_count = tools.len();
        for tool in tools {
            if let Some(&previous) = state.routes.get(&tool.name) {
                warn!(
                    tool = %tool.name,
                    previous = %state.sessions[previous].label(),
                    replacement = %label,
                    "duplicate tool name; latest registration wins"
                );
            }
            state.routes.insert(tool.name.clone(), id);
            match state.catalog_index.get(&tool.name).copied() {
                Some(pos) => state.catalog[pos] = tool,
                None => {
                    let pos = state.catalog.len();
                    state.catalog_index.insert(tool.name.clone(), pos);
                    state.catalog.push(tool);
                }
            }
        }

        info!(session = %label, session_id = id, tools = tool_count, "registered tool provider");
        id
    }

    /// Session owning `tool_name`, if any.
    pub fn resolve(&self, tool_name: &str) -> Option<Arc<dyn ProviderSession>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .routes
            .get(tool_name)
            .map(|&id| Arc::clone(&state.sessions[id]))
    }

    /// Every published tool, in first-registration order.
    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .catalog
            .clone()
    }

    /// Human-readable listing of the catalog: name, description and
    /// pretty-printed parameter schema per tool.
    pub fn describe_catalog(&self) -> String {
        let catalog = self.catalog();
        let mut out = String::new();
        for tool in &catalog {
            let parameters = serde_json::to_string_pretty(&tool.parameters)
                .unwrap_or_else(|_| tool.parameters.to_string());
            let _ = writeln!(out, "Tool: {}", tool.name);
            if !tool.description.is_empty() {
                let _ = writeln!(out, "Description: {}", tool.description);
            }
            let _ = writeln!(out, "Parameters: {parameters}");
            out.push('\n');
        }
        out
    }

    /// Number of published tools.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .routes
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn session_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .len()
    }

    /// Close every distinct session once and empty the registry.
    ///
    /// All sessions are attempted even when some fail; the failures are
    /// reported together.
    pub async fn close_all(&self) -> Result<(), RelayError> {
        let sessions = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let taken = std::mem::take(&mut *state);
            taken.sessions
        };

        let mut distinct: Vec<Arc<dyn ProviderSession>> = Vec::with_capacity(sessions.len());
        for session in sessions {
            let addr = Arc::as_ptr(&session) as *const ();
            if !distinct
                .iter()
                .any(|seen| Arc::as_ptr(seen) as *const () == addr)
            {
                distinct.push(session);
            }
        }

        debug!(sessions = distinct.len(), "closing tool provider sessions");
        let results = join_all(distinct.iter().map(|session| async move {
            session
                .close()
                .await
                .map_err(|e| format!("{}: {e}", session.label()))
        }))
        .await;

        let failures = results
            .into_iter()
            .filter_map(Result::err)
            .collect::<Vec<_>>();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RelayError::SessionClose { failures })
        }
    }
}

async fn connect_and_list(
    connector: &dyn SessionConnector,
) -> Result<(Arc<dyn ProviderSession>, Vec<ToolDescriptor>), RelayError> {
    let label = connector.label().to_string();
    let session = connector
        .connect()
        .await
        .map_err(|e| connection_error(&label, e))?;

    match session.list_tools().await {
        Ok(tools) => Ok((session, tools)),
        Err(e) => {
            if let Err(close_err) = session.close().await {
                debug!(server = %label, error = %close_err, "close after failed tool listing also failed");
            }
            Err(connection_error(&label, e))
        }
    }
}

fn connection_error(server: &str, error: RelayError) -> RelayError {
    match error {
        RelayError::Connection { .. } => error,
        other => RelayError::Connection {
            server: server.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    use crate::types::ToolOutput;

    struct StubSession {
        label: String,
        tools: Vec<ToolDescriptor>,
        closes: AtomicUsize,
        fail_close: bool,
    }

    impl StubSession {
        fn new(label: &str, tools: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                label: label.into(),
                tools: tools
                    .iter()
                    .map(|name| ToolDescriptor::new(*name, format!("{name} tool"), json!({"type": "object"})))
                    .collect(),
                closes: AtomicUsize::new(0),
                fail_close: false,
            })
        }
    }

    #[async_trait]
    impl ProviderSession for StubSession {
        fn label(&self) -> &str {
            &self.label
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, RelayError> {
            Ok(self.tools.clone())
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> Result<ToolOutput, RelayError> {
            Ok(ToolOutput::text(self.label.clone()))
        }

        async fn close(&self) -> Result<(), RelayError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(RelayError::Stream("broken pipe".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn resolve_routes_each_tool_to_its_session() {
        let registry = SessionRegistry::new();
        registry
            .register_session(StubSession::new("fs", &["read_file", "write_file"]))
            .await
            .expect("fs should register");
        registry
            .register_session(StubSession::new("web", &["fetch"]))
            .await
            .expect("web should register");

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.resolve("read_file").map(|s| s.label().to_string()).as_deref(), Some("fs"));
        assert_eq!(registry.resolve("fetch").map(|s| s.label().to_string()).as_deref(), Some("web"));
        assert!(registry.resolve("missing").is_none());
    }

    #[tokio::test]
    async fn later_registration_wins_collisions_and_replaces_descriptor() {
        let registry = SessionRegistry::new();
        registry
            .register_session(StubSession::new("first", &["search", "a"]))
            .await
            .expect("first should register");
        registry
            .register_session(StubSession::new("second", &["search"]))
            .await
            .expect("second should register");

        let owner = registry.resolve("search").expect("search should resolve");
        assert_eq!(owner.label(), "second");

        let catalog = registry.catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].name, "search");
        assert_eq!(catalog[1].name, "a");
    }

    #[tokio::test]
    async fn close_all_closes_each_distinct_session_once() {
        let registry = SessionRegistry::new();
        let shared = StubSession::new("shared", &["x"]);
        registry
            .register_session(shared.clone())
            .await
            .expect("first registration should work");
        registry
            .register_session(shared.clone())
            .await
            .expect("second registration should work");

        registry.close_all().await.expect("close should succeed");
        assert_eq!(shared.closes.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.session_count(), 0);

        registry.close_all().await.expect("second close is a no-op");
        assert_eq!(shared.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_all_attempts_every_session_and_reports_failures() {
        let registry = SessionRegistry::new();
        let broken = Arc::new(StubSession {
            label: "broken".into(),
            tools: Vec::new(),
            closes: AtomicUsize::new(0),
            fail_close: true,
        });
        let healthy = StubSession::new("healthy", &["ok"]);
        registry.register_session(broken.clone()).await.expect("broken should register");
        registry.register_session(healthy.clone()).await.expect("healthy should register");

        let err = registry.close_all().await.expect_err("close should report failure");
        assert!(matches!(
            &err,
            RelayError::SessionClose { failures } if failures.len() == 1 && failures[0].starts_with("broken:")
        ));
        assert_eq!(healthy.closes.load(Ordering::SeqCst), 1);
        assert_eq!(broken.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn describe_catalog_lists_name_description_and_parameters() {
        let registry = SessionRegistry::new();
        registry
            .register_session(StubSession::new("fs", &["read_file"]))
            .await
            .expect("fs should register");

        let listing = registry.describe_catalog();
        assert!(listing.contains("Tool: read_file"));
        assert!(listing.contains("Description: read_file tool"));
        assert!(listing.contains("\"type\": \"object\""));
    }
}
