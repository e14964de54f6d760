//! mcp-relay binary entry point.

use std::sync::Arc;

use mcp_relay::cli::chat::{ChatLoop, LoopOutcome};
use mcp_relay::cli::errors::format_error_help;
use mcp_relay::cli::render::Renderer;
use mcp_relay::cli::Cli;
use mcp_relay::config::RelayConfig;
use mcp_relay::error::RelayError;
use mcp_relay::mcp::StdioServer;
use mcp_relay::provider::openai_compatible::OpenAiCompatibleProvider;
use mcp_relay::registry::SessionRegistry;
use mcp_relay::turn::TurnDriver;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse_args();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", format_error_help(&e));
        std::process::exit(1);
    }
}

/// Logs go to stderr so the streamed answer on stdout stays clean.
fn init_logging() {
    let env_filter =
        EnvFilter::try_from_env("MCP_RELAY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> Result<(), RelayError> {
    let mut config = RelayConfig::resolve(cli.config.as_deref())?;
    cli.apply_to(&mut config);
    config.validate()?;

    let registry = Arc::new(SessionRegistry::new());
    let servers = config
        .servers
        .iter()
        .map(StdioServer::from)
        .collect::<Vec<_>>();
    if let Err(e) = registry.register_all(&servers).await {
        let _ = registry.close_all().await;
        return Err(e);
    }

    let mut renderer = Renderer::stdout();
    if cli.list_tools {
        print!("{}", registry.describe_catalog());
        return registry.close_all().await;
    }

    if config.model.api_key.is_none() {
        tracing::warn!("no API key configured; set HF_TOKEN or MCP_RELAY_API_KEY");
    }
    let provider = OpenAiCompatibleProvider::new(&config.model.base_url, config.model.api_key.clone());
    let driver = TurnDriver::builder()
        .provider(Arc::new(provider))
        .registry(Arc::clone(&registry))
        .model(config.model.model.clone())
        .settings(config.sampling_settings())
        .retry(config.retry_policy())
        .tool_concurrency(config.agent.tool_concurrency)
        .build();

    let mut chat = ChatLoop::new(driver, config.agent.max_turns)
        .with_exit_loop_tools(config.exit_loop_tools())
        .with_fast_exit(cli.fast_exit);
    if let Some(system) = &cli.system {
        chat = chat.with_system_prompt(system);
    }

    let result = match cli.prompt.as_deref() {
        Some(prompt) => send(&mut chat, prompt, &mut renderer).await,
        None => {
            renderer.banner(&registry.catalog())?;
            prompt_loop(&mut chat, &mut renderer).await
        }
    };

    let closed = registry.close_all().await;
    result.and(closed)
}

/// Read user lines until `exit`, EOF or Ctrl-C while idle.
async fn prompt_loop(
    chat: &mut ChatLoop,
    renderer: &mut Renderer<std::io::Stdout>,
) -> Result<(), RelayError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::Write::flush(&mut std::io::stdout())?;

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                renderer.notice("\nGoodbye!")?;
                return Ok(());
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            renderer.notice("Goodbye!")?;
            return Ok(());
        }

        if let Err(e) = send(chat, input, renderer).await {
            renderer.error(&e)?;
        }
    }
}

/// Run one user message; Ctrl-C during it cancels the message only.
async fn send(
    chat: &mut ChatLoop,
    input: &str,
    renderer: &mut Renderer<std::io::Stdout>,
) -> Result<(), RelayError> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let outcome = chat.send(input, &cancel, renderer).await;
    watcher.abort();

    match outcome {
        Ok(LoopOutcome::Answered) => Ok(()),
        Ok(LoopOutcome::ExitTool(name)) => renderer
            .notice(&format!("[{name}] ended the loop"))
            .map_err(RelayError::from),
        Ok(LoopOutcome::TurnLimit) => renderer
            .notice("Stopped: turn limit reached while the model was still calling tools.")
            .map_err(RelayError::from),
        Err(RelayError::Canceled) => renderer.notice("[canceled]").map_err(RelayError::from),
        Err(e) => Err(e),
    }
}
