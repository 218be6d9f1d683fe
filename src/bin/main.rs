//! `ask` - put one question to the assistant from the terminal.
//!
//! Answer text goes to stdout as it streams; tool activity goes to stderr.

use construction_finance_assistant::{
    agent::{Orchestrator, OrchestratorSettings},
    config::AppConfig,
    gateway,
    llm::OpenRouterClient,
    models::ChatMessage,
    stream::StreamChunk,
    tools::create_default_registry,
};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let question = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        eprintln!("Usage: ask <question>");
        eprintln!("Example: ask \"Which packages are overspent?\"");
        std::process::exit(2);
    }

    let config = AppConfig::from_env()?;
    let orchestrator = Orchestrator::new(
        Arc::new(OpenRouterClient::new(&config.model)?),
        create_default_registry(),
        gateway::from_config(&config.gateway)?,
        OrchestratorSettings::from(&config),
    );

    info!(question = %question, "Asking");

    let mut stream = orchestrator
        .stream_chat(vec![ChatMessage::user(question)])
        .await?;

    let mut stdout = std::io::stdout();
    let mut failed = false;

    while let Some(chunk) = stream.next().await {
        match chunk {
            StreamChunk::TextDelta(text) => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            StreamChunk::ToolCall(call) => {
                eprintln!("-> {} {}", call.name, call.arguments);
            }
            StreamChunk::ToolResult(result) if result.is_error() => {
                eprintln!("<- {} failed: {}", result.tool_name, result.payload["error"]);
            }
            StreamChunk::ToolResult(result) => {
                eprintln!("<- {} ok", result.tool_name);
            }
            StreamChunk::Error(message) => {
                eprintln!("\nError: {}", message);
                failed = true;
            }
            StreamChunk::Finish { .. } => writeln!(stdout)?,
            StreamChunk::StepStart { .. } | StreamChunk::StepFinish { .. } => {}
        }
    }

    // Let the conversation log write land before exiting
    stream.join().await;

    if failed {
        std::process::exit(1);
    }

    Ok(())
}
