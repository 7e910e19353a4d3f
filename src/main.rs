use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use changescribe::config::Config;

mod cmd;

#[derive(Parser)]
#[command(name = "changescribe")]
#[command(version, about = "Session-orchestration backend for VCS-to-document generation")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "changescribe.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the callback gateway and timeout supervisor
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
        /// Bind 0.0.0.0 and enable permissive CORS
        #[arg(long)]
        dev: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Check the configuration file for errors
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, dev } => {
            let mut config = Config::load(&cli.config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if dev {
                config.server.dev_mode = true;
            }
            cmd::serve(config).await
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => cmd::config_show(&cli.config),
            ConfigCommands::Validate => cmd::config_validate(&cli.config),
        },
    }
}
