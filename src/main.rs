//! AttoClaw CLI entry point.
//!
//! Runs one turn sequence against the configured backend and prints the
//! final answer. The conversation id keeps history across invocations
//! within one process run; transports and schedulers embed the library
//! directly instead.

use std::sync::Arc;

use anyhow::Context;
use base64::Engine;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use attoclaw::agent::{Agent, LoopGuard};
use attoclaw::config::Config;
use attoclaw::providers::resolve_backend;
use attoclaw::session::ImageAttachment;
use attoclaw::tools::{EchoTool, ToolRegistry};

#[derive(Parser)]
#[command(name = "attoclaw", version, about = "Minimal tool-calling agent runtime")]
struct Cli {
    /// The message to send to the agent
    message: String,

    /// Conversation id (history is kept per id within this run)
    #[arg(long, default_value = "cli")]
    conversation: String,

    /// Path to the config file (defaults to ~/.attoclaw/config.toml)
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Attach an image file to the message
    #[arg(long)]
    image: Option<std::path::PathBuf>,

    /// Print streamed progress to stderr while the answer is generated
    #[arg(long)]
    stream: bool,
}

fn media_type_for(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path).context("loading config")?,
        None => Config::load().context("loading config")?,
    };

    let backend = resolve_backend(&config.backend).context("resolving backend")?;

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));

    let agent = Agent::new(
        config,
        backend,
        Arc::new(registry),
        Arc::new(LoopGuard::new()),
    );

    let image = match &cli.image {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading image {}", path.display()))?;
            let data = base64::engine::general_purpose::STANDARD.encode(bytes);
            Some(ImageAttachment::new(media_type_for(path), &data))
        }
        None => None,
    };

    let on_chunk: Option<attoclaw::agent::ProgressCallback> = if cli.stream {
        Some(Arc::new(|text: String| {
            eprint!("\r\x1b[2K{}", text.replace('\n', " "));
        }))
    } else {
        None
    };

    let answer = agent
        .run_turn(&cli.conversation, &cli.message, on_chunk, image)
        .await;
    if cli.stream {
        eprintln!();
    }
    println!("{}", answer);

    Ok(())
}
