use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use palette_core::config::Config;
use palette_gateway::GatewayState;

mod logging;

#[derive(Parser)]
#[command(
    name = "palette",
    about = "Chat with a language model that paints onto a shared canvas",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP + WebSocket server
    Serve {
        /// Port to listen on (default: 8787)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the configuration, or one value by dotted path
    Show { path: Option<String> },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    logging::init(&config.logging.clone().unwrap_or_default(), cli.verbose)?;

    match cli.command {
        Commands::Serve { port, bind } => {
            let (warnings, errors) = config.validate();
            for w in &warnings {
                warn!("Config: {w}");
            }
            if !errors.is_empty() {
                anyhow::bail!("Invalid config {}: {}", config_path.display(), errors.join("; "));
            }

            let port = port.unwrap_or_else(|| config.gateway_port());
            let bind = bind.unwrap_or_else(|| config.gateway_bind());
            info!(config = %config_path.display(), "Starting Palette on {bind}:{port}");

            let state = Arc::new(GatewayState::from_config(config));
            palette_gateway::start_gateway(state, &bind, port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { path: None } => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Show { path: Some(path) } => match config.get_path(&path) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{path}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
    }

    Ok(())
}
