//! CLI command handlers.

use std::path::Path;

use anyhow::{Context, Result};

use changescribe::config::Config;
use changescribe::gateway;

/// `changescribe serve`
pub async fn serve(config: Config) -> Result<()> {
    gateway::start_server(config).await
}

/// `changescribe config show`
pub fn config_show(path: &Path) -> Result<()> {
    let config = Config::load(path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

/// `changescribe config validate`
pub fn config_validate(path: &Path) -> Result<()> {
    match Config::load(path) {
        Ok(_) => {
            println!("Configuration OK");
            Ok(())
        }
        Err(err) => {
            eprintln!("Configuration invalid: {err:#}");
            std::process::exit(1);
        }
    }
}
