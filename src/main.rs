use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

use dialogue_engine::dialog::{DialogController, PromptMacros};
use dialogue_engine::metrics::METRICS;
use dialogue_engine::{logging, Config, OpenAiTransport, StreamingSession};

/// Chat with an LLM about your code, one streamed turn at a time
#[derive(Debug, Parser)]
#[command(name = "dialogue", version)]
struct Cli {
    /// Config file (defaults to ./dialogue.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File whose contents seed the conversation before the first prompt
    #[arg(short, long)]
    seed: Option<PathBuf>,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    logging::init(&config.logging)?;

    let transport = OpenAiTransport::new(config.openai_config())?;
    let mut session = StreamingSession::new(config.session_settings(), Arc::new(transport))?;

    if let Some(path) = &cli.seed {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        info!(
            path = %path.display(),
            tokens = session.count_text_tokens(&text),
            "Seeding conversation"
        );
        session.add_user_message(text);
    }
    info!(tokens = session.count_history_tokens(), "Initial context ready");

    let macros = PromptMacros::new(&config.prompts);
    let mut controller = DialogController::new(
        session,
        macros,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );
    controller.run().await?;

    if cli.metrics {
        eprintln!("{}", METRICS.render());
    }

    Ok(())
}
