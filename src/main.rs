//! Kestrel CLI binary entry point.

use std::io::Read;
use std::sync::Arc;

use clap::Parser;
use kestrel::cli::{pipe_message, ChatArgs, Cli, Commands, PipeArgs, PIPE_SYSTEM_INSTRUCTION};
use kestrel::config::KestrelConfig;
use kestrel::engine::ConversationEngine;
use kestrel::error::KestrelError;
use kestrel::provider::GeminiService;
use kestrel::types::GenerationSettings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Chat(args) => handle_chat(args).await,
        Commands::Pipe(args) => handle_pipe(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn service(config: &KestrelConfig, model: Option<&str>) -> Result<Arc<GeminiService>, KestrelError> {
    let model = model.unwrap_or(config.default_model());
    Ok(Arc::new(GeminiService::for_model(config, model)?))
}

fn engine_builder(
    config: &KestrelConfig,
    model: Option<&str>,
) -> Result<kestrel::engine::EngineBuilder, KestrelError> {
    let mut builder = ConversationEngine::builder(service(config, model)?);
    if let Some(timeout) = config.request_timeout() {
        builder = builder.with_request_timeout(timeout);
    }
    Ok(builder)
}

async fn handle_chat(args: ChatArgs) -> Result<(), KestrelError> {
    let config = KestrelConfig::from_env()?;
    let settings = GenerationSettings::builder()
        .maybe_temperature(args.temperature)
        .maybe_max_tokens(args.max_tokens)
        .build();

    let mut builder = engine_builder(&config, args.model.as_deref())?.with_settings(settings);
    if let Some(system) = args.system {
        builder = builder.with_system_instruction(system);
    }
    let engine = builder.build()?;

    let reply = engine.send(&args.prompt, None).await?;
    println!("{}", reply.text);
    tracing::debug!(total_tokens = reply.usage.total_tokens, "Chat finished");
    Ok(())
}

async fn handle_pipe(args: PipeArgs) -> Result<(), KestrelError> {
    let mut content = String::new();
    std::io::stdin().read_to_string(&mut content)?;

    let config = KestrelConfig::from_env()?;
    let engine = engine_builder(&config, args.model.as_deref())?
        .with_system_instruction(PIPE_SYSTEM_INSTRUCTION)
        .build()?;

    let reply = engine.send(&pipe_message(&args.prompt, &content), None).await?;
    println!("{}", reply.text);
    Ok(())
}
