/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! tandemctl - runs the Tandem outbox/inbox loops and the demo producer API.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

mod commands;
mod config;
mod demo;

use config::{ConfigLoader, Validate};

/// Tandem - transactional outbox and inbox between PostgreSQL and Kafka
#[derive(Parser)]
#[command(name = "tandemctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to TANDEM_CONFIG, then the search paths)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database URL (can also be set via DATABASE_URL environment variable)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the outbox, inbox and demo migrations
    Migrate,
    /// Run the outbox/inbox loops and the demo HTTP API until Ctrl-C
    Serve,
    /// Print the default configuration as TOML
    DefaultConfig,
}

/// `-v` forces debug output; otherwise `RUST_LOG` decides.
fn log_level(verbose: bool) -> Option<Level> {
    verbose.then_some(Level::DEBUG)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tandem::init_logging(log_level(cli.verbose));

    if let Commands::DefaultConfig = cli.command {
        print!("{}", config::generate_default_config_toml()?);
        return Ok(());
    }

    let config = ConfigLoader::new()
        .load_config(cli.config.as_deref())?
        .with_database_url(cli.database_url);
    config.validate().map_err(config::ConfigError::from)?;

    match cli.command {
        Commands::Migrate => commands::migrate::run(&config).await?,
        Commands::Serve => commands::serve::run(config).await?,
        Commands::DefaultConfig => {}
    }

    Ok(())
}
