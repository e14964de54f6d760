//! Configuration (layered: code > env > config file).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RelayError;
use crate::provider::SamplingSettings;
use crate::turn::RetryPolicy;
use crate::types::ToolDescriptor;

/// Hugging Face's OpenAI-compatible inference router.
pub const DEFAULT_BASE_URL: &str = "https://router.huggingface.co/v1";
pub const DEFAULT_MODEL: &str = "Qwen/Qwen2.5-72B-Instruct";

/// Top-level configuration.
///
/// ```toml
/// [model]
/// base_url = "https://router.huggingface.co/v1"
/// model = "Qwen/Qwen2.5-72B-Instruct"
///
/// [agent]
/// max_retries = 3
///
/// [[servers]]
/// id = "filesystem"
/// command = "npx"
/// args = ["-y", "@modelcontextprotocol/server-filesystem", "/home/me/Desktop"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub servers: Vec<ServerConfig>,
}

/// Model endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            max_tokens: Some(512),
            temperature: None,
        }
    }
}

/// Turn and conversation-loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Total attempts per turn when tool-call arguments arrive truncated.
    pub max_retries: u32,
    /// Upper bound on model turns per user message.
    pub max_turns: u32,
    /// Tool calls dispatched concurrently within one turn.
    pub tool_concurrency: usize,
    /// Tools that end the conversation loop instead of running.
    pub exit_loop_tools: Vec<ExitToolConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_turns: 10,
            tool_concurrency: 1,
            exit_loop_tools: Vec::new(),
        }
    }
}

/// An exit-loop tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ExitToolConfig {
    pub fn to_descriptor(&self) -> ToolDescriptor {
        match &self.parameters {
            Some(parameters) => {
                ToolDescriptor::new(&self.name, &self.description, parameters.clone())
            }
            None => ToolDescriptor::without_parameters(&self.name, &self.description),
        }
    }
}

/// A stdio MCP server to launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl RelayConfig {
    /// Read a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| RelayError::Configuration(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), servers = config.servers.len(), "loaded config file");
        Ok(config)
    }

    /// Resolve the full layered config.
    ///
    /// Uses `path` when given, else the default config file when it exists,
    /// else built-in defaults; environment overrides are applied on top.
    pub fn resolve(path: Option<&Path>) -> Result<Self, RelayError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(default) => Self::load(default)?,
                None => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `MCP_RELAY_*` and `HF_TOKEN` overrides from the process env.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = var("MCP_RELAY_BASE_URL") {
            self.model.base_url = url;
        }
        if let Some(model) = var("MCP_RELAY_MODEL") {
            self.model.model = model;
        }
        if let Some(key) = var("MCP_RELAY_API_KEY") {
            self.model.api_key = Some(key);
        } else if self.model.api_key.is_none() {
            self.model.api_key = var("HF_TOKEN");
        }
    }

    /// Reject configurations the relay cannot run with.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.model.model.trim().is_empty() {
            return Err(RelayError::Configuration("model id must not be empty".into()));
        }
        if self.model.base_url.trim().is_empty() {
            return Err(RelayError::Configuration("base_url must not be empty".into()));
        }
        if self.agent.max_retries == 0 {
            return Err(RelayError::Configuration(
                "agent.max_retries must be at least 1".into(),
            ));
        }
        if self.agent.tool_concurrency == 0 {
            return Err(RelayError::Configuration(
                "agent.tool_concurrency must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.id.trim().is_empty() {
                return Err(RelayError::Configuration("server id must not be empty".into()));
            }
            if server.command.trim().is_empty() {
                return Err(RelayError::Configuration(format!(
                    "server '{}' has an empty command",
                    server.id
                )));
            }
            if !seen.insert(server.id.as_str()) {
                return Err(RelayError::Configuration(format!(
                    "duplicate server id '{}'",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn sampling_settings(&self) -> SamplingSettings {
        SamplingSettings {
            max_tokens: self.model.max_tokens,
            temperature: self.model.temperature,
            top_p: None,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.agent.max_retries)
    }

    pub fn exit_loop_tools(&self) -> Vec<ToolDescriptor> {
        self.agent
            .exit_loop_tools
            .iter()
            .map(ExitToolConfig::to_descriptor)
            .collect()
    }
}

/// `~/.mcp-relay/config.toml`, when a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    directories::UserDirs::new().map(|dirs| dirs.home_dir().join(".mcp-relay").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = RelayConfig::default();
        assert_eq!(config.agent.max_retries, 3);
        assert_eq!(config.agent.tool_concurrency, 1);
        assert_eq!(config.model.base_url, DEFAULT_BASE_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn relay_api_key_beats_file_and_hf_token() {
        let mut config = RelayConfig::default();
        config.model.api_key = Some("from-file".into());
        config.apply_env_with(env(&[("MCP_RELAY_API_KEY", "relay"), ("HF_TOKEN", "hf")]));
        assert_eq!(config.model.api_key.as_deref(), Some("relay"));
    }

    #[test]
    fn hf_token_only_fills_a_missing_key() {
        let mut config = RelayConfig::default();
        config.apply_env_with(env(&[("HF_TOKEN", "hf_abc")]));
        assert_eq!(config.model.api_key.as_deref(), Some("hf_abc"));

        let mut config = RelayConfig::default();
        config.model.api_key = Some("from-file".into());
        config.apply_env_with(env(&[("HF_TOKEN", "hf_abc")]));
        assert_eq!(config.model.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = RelayConfig::default();
        config.apply_env_with(env(&[("MCP_RELAY_MODEL", "  ")]));
        assert_eq!(config.model.model, DEFAULT_MODEL);
    }

    #[test]
    fn validate_rejects_duplicate_server_ids() {
        let server = ServerConfig {
            id: "fs".into(),
            command: "npx".into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        };
        let config = RelayConfig {
            servers: vec![server.clone(), server],
            ..Default::default()
        };
        let err = config.validate().expect_err("duplicates should be rejected");
        assert!(matches!(err, RelayError::Configuration(message) if message.contains("duplicate")));
    }

    #[test]
    fn validate_rejects_zero_retries() {
        let mut config = RelayConfig::default();
        config.agent.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn exit_tool_without_parameters_gets_empty_schema() {
        let tool = ExitToolConfig {
            name: "task_complete".into(),
            description: "Call when done".into(),
            parameters: None,
        };
        let descriptor = tool.to_descriptor();
        assert_eq!(descriptor.parameters["type"], "object");
    }
}
