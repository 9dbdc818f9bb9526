use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

mod app;
mod backend;
mod commands;
mod config;
mod render;
mod selection;

use crate::backend::BackendClient;
use crate::config::{ChatConfig, CliOverrides, FileConfig};

#[derive(Parser)]
#[command(name = "kbchat")]
#[command(about = "Ask several documentation assistants the same question side by side")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom config directory (defaults to ~/.kbchat)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Maximum number of panes (overrides [panes].max)
    #[arg(long, global = true)]
    max_panes: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive multi-pane chat (the default)
    Chat,

    /// List products and their versions
    Collections(ListArgs),

    /// List the models that can answer
    Models(ListArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Parser)]
struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.debug);

    let config_dir = config::config_dir(cli.config_dir.clone())?;
    let file_config: FileConfig = config::load_config(&config_dir)
        .extract()
        .with_context(|| format!("Invalid configuration in {}", config_dir.display()))?;
    let chat_config = ChatConfig::from_file(
        &file_config,
        &CliOverrides {
            max_panes: cli.max_panes,
        },
    );

    match cli.command {
        None | Some(Commands::Chat) => {
            info!(
                api = %chat_config.api_url,
                ws = %chat_config.ws_url,
                max_panes = chat_config.max_panes,
                "starting kbchat"
            );
            app::run(chat_config).await
        }
        Some(Commands::Collections(args)) => collections_command(&chat_config, args.json).await,
        Some(Commands::Models(args)) => models_command(&chat_config, args.json).await,
        Some(Commands::Config) => {
            let rendered =
                toml::to_string_pretty(&file_config).context("Failed to render configuration")?;
            print!("{rendered}");
            Ok(())
        }
    }
}

/// Logs go to stderr so they never interleave with the transcript on stdout.
fn init_tracing(debug: bool) {
    let default_directive = if debug {
        "kb_chat=debug,stream_session=debug,info"
    } else {
        "kb_chat=info,stream_session=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

async fn collections_command(config: &ChatConfig, json: bool) -> Result<()> {
    let client = BackendClient::new(&config.api_url, config.request_timeout)?;
    let collections = client
        .collections()
        .await
        .with_context(|| format!("Failed to list products from {}", config.api_url))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&collections)?);
        return Ok(());
    }
    if collections.is_empty() {
        println!("No products available.");
    }
    for collection in &collections {
        let versions: Vec<&str> = collection
            .versions
            .iter()
            .map(|v| v.version_number.as_str())
            .collect();
        println!(
            "{} [{}]: {}",
            collection.collection_full_name,
            collection.collection_base_name,
            versions.join(", ")
        );
    }
    Ok(())
}

async fn models_command(config: &ChatConfig, json: bool) -> Result<()> {
    let client = BackendClient::new(&config.api_url, config.request_timeout)?;
    let models = client
        .models()
        .await
        .with_context(|| format!("Failed to list models from {}", config.api_url))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }
    if models.is_empty() {
        println!("No models available.");
    }
    for model in &models {
        println!("{}", model.name);
    }
    Ok(())
}
