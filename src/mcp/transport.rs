//! Stdio MCP servers.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{ClientInfo, ProtocolVersion};
use rmcp::service::{ClientInitializeError, ServiceExt};
use rmcp::transport::TokioChildProcess;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::RelayError;

use super::client::{
    is_protocol_version_mismatch, map_client_initialize_error, McpRunningService, McpSession,
};
use super::session::{ProviderSession, SessionConnector};

/// A local MCP server launched as a child process speaking JSON-RPC on stdio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioServer {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl From<&ServerConfig> for StdioServer {
    fn from(config: &ServerConfig) -> Self {
        Self {
            id: config.id.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
        }
    }
}

impl StdioServer {
    pub fn new(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Environment handed to the child on top of the inherited one.
    ///
    /// `PATH` always carries the relay's own `PATH`; a configured `PATH`
    /// is searched first.
    pub fn effective_env(&self) -> BTreeMap<String, OsString> {
        let mut env: BTreeMap<String, OsString> = self
            .env
            .iter()
            .map(|(key, value)| (key.clone(), OsString::from(value)))
            .collect();

        let Some(process_path) = std::env::var_os("PATH") else {
            return env;
        };
        let path = match self.env.get("PATH") {
            Some(configured) => {
                let dirs = std::env::split_paths(configured)
                    .chain(std::env::split_paths(&process_path))
                    .collect::<Vec<_>>();
                std::env::join_paths(dirs).unwrap_or(process_path)
            }
            None => process_path,
        };
        env.insert("PATH".to_string(), path);
        env
    }

    fn build_command(&self) -> Command {
        let mut command = Command::new(&self.command);
        command.args(&self.args).envs(self.effective_env());
        command
    }

    async fn connect_with(
        &self,
        protocol_version: ProtocolVersion,
    ) -> Result<McpRunningService, ClientInitializeError> {
        let transport = TokioChildProcess::new(self.build_command()).map_err(|error| {
            ClientInitializeError::transport::<TokioChildProcess>(error, "spawn stdio transport")
        })?;
        let client_info = ClientInfo {
            protocol_version,
            ..Default::default()
        };
        client_info.into_dyn().serve(transport).await
    }
}

#[async_trait]
impl SessionConnector for StdioServer {
    fn label(&self) -> &str {
        &self.id
    }

    async fn connect(&self) -> Result<Arc<dyn ProviderSession>, RelayError> {
        debug!(server = %self.id, command = %self.command, args = ?self.args, "spawning MCP server");

        let service = match self.connect_with(ProtocolVersion::LATEST).await {
            Ok(service) => service,
            Err(error) if is_protocol_version_mismatch(&error) => {
                warn!(server = %self.id, "server rejected latest protocol version; retrying with 2024-11-05");
                self.connect_with(ProtocolVersion::V_2024_11_05)
                    .await
                    .map_err(|e| map_client_initialize_error(&self.id, e))?
            }
            Err(error) => return Err(map_client_initialize_error(&self.id, error)),
        };

        Ok(Arc::new(McpSession::from_running_service(
            self.id.clone(),
            service,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_keeps_command_and_args() {
        let server = StdioServer::new("fs", "npx", vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into()]);
        assert_eq!(server.label(), "fs");
        assert_eq!(server.command, "npx");
        assert_eq!(server.args.len(), 2);
    }

    #[test]
    fn converts_from_server_config() {
        let config = ServerConfig {
            id: "web".into(),
            command: "npx".into(),
            args: vec!["@playwright/mcp@latest".into()],
            env: BTreeMap::from([("DEBUG".to_string(), "1".to_string())]),
        };
        let server = StdioServer::from(&config);
        assert_eq!(server.id, "web");
        assert_eq!(server.args, vec!["@playwright/mcp@latest".to_string()]);
        assert_eq!(server.env.get("DEBUG").map(String::as_str), Some("1"));
    }

    #[test]
    fn effective_env_always_carries_process_path() {
        let Some(process_path) = std::env::var_os("PATH") else {
            return;
        };
        let server = StdioServer::new("fs", "node", Vec::new()).with_env("API_KEY", "secret");
        let env = server.effective_env();
        assert_eq!(env.get("API_KEY"), Some(&OsString::from("secret")));
        assert_eq!(env.get("PATH"), Some(&process_path));
    }

    #[test]
    fn configured_path_is_searched_before_process_path() {
        let Some(process_path) = std::env::var_os("PATH") else {
            return;
        };
        let server = StdioServer::new("fs", "node", Vec::new()).with_env("PATH", "/opt/tools/bin");
        let env = server.effective_env();
        let merged = env.get("PATH").expect("PATH should be set");
        let dirs = std::env::split_paths(merged).collect::<Vec<_>>();
        assert_eq!(dirs[0], std::path::PathBuf::from("/opt/tools/bin"));
        assert_eq!(
            dirs[1..].to_vec(),
            std::env::split_paths(&process_path).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn missing_binary_fails_with_connection_error() {
        let server = StdioServer::new("ghost", "/nonexistent/mcp-relay-test-server", Vec::new());
        let err = match server.connect().await {
            Ok(_) => panic!("spawning a missing binary should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, RelayError::Connection { server, .. } if server == "ghost"));
    }
}
