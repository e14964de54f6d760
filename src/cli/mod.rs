//! CLI for mcp-relay.

pub mod chat;
pub mod errors;
pub mod render;

use std::path::PathBuf;

use clap::Parser;

use crate::config::RelayConfig;

/// Chat with a model that can call tools served by local MCP servers.
#[derive(Parser, Debug)]
#[command(name = "mcp-relay", version, about = "Chat with a model that calls MCP tools")]
pub struct Cli {
    /// Config file (defaults to ~/.mcp-relay/config.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Model id, overriding config and MCP_RELAY_MODEL
    #[arg(short, long)]
    pub model: Option<String>,

    /// OpenAI-compatible base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Max tokens per response
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Upper bound on model turns per message
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Tool calls run concurrently within a turn
    #[arg(long)]
    pub tool_concurrency: Option<usize>,

    /// End follow-up turns as soon as their first chunk shows no tool call
    #[arg(long)]
    pub fast_exit: bool,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Print the tool catalog and exit
    #[arg(long)]
    pub list_tools: bool,

    /// Send one message and exit instead of starting the prompt loop
    pub prompt: Option<String>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Apply flag overrides on top of a resolved config.
    pub fn apply_to(&self, config: &mut RelayConfig) {
        if let Some(model) = &self.model {
            config.model.model = model.clone();
        }
        if let Some(url) = &self.base_url {
            config.model.base_url = url.clone();
        }
        if let Some(max) = self.max_tokens {
            config.model.max_tokens = Some(max);
        }
        if let Some(turns) = self.max_turns {
            config.agent.max_turns = turns;
        }
        if let Some(concurrency) = self.tool_concurrency {
            config.agent.tool_concurrency = concurrency;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_defaults() {
        let cli = Cli::try_parse_from(["mcp-relay"]).expect("bare invocation should parse");
        assert!(cli.config.is_none());
        assert!(cli.prompt.is_none());
        assert!(!cli.fast_exit);
        assert!(!cli.list_tools);
    }

    #[test]
    fn parse_one_shot_prompt_with_options() {
        let cli = Cli::try_parse_from([
            "mcp-relay",
            "--config",
            "relay.toml",
            "-m",
            "meta-llama/Llama-3.3-70B-Instruct",
            "--max-turns",
            "4",
            "--fast-exit",
            "list my desktop",
        ])
        .expect("options should parse");
        assert_eq!(cli.config, Some(PathBuf::from("relay.toml")));
        assert_eq!(cli.max_turns, Some(4));
        assert!(cli.fast_exit);
        assert_eq!(cli.prompt.as_deref(), Some("list my desktop"));
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "mcp-relay",
            "--base-url",
            "http://localhost:8000/v1",
            "--tool-concurrency",
            "4",
        ])
        .expect("options should parse");
        let mut config = RelayConfig::default();
        cli.apply_to(&mut config);
        assert_eq!(config.model.base_url, "http://localhost:8000/v1");
        assert_eq!(config.agent.tool_concurrency, 4);
        assert_eq!(config.agent.max_turns, 10);
    }
}
