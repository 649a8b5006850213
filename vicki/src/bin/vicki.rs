//! Vicki CLI
//!
//! # Usage
//!
//! ```bash
//! # Show what a script declares in its metablock
//! vicki inspect scripts/weather.vs.js
//! vicki inspect --json scripts/*.vs.js
//!
//! # Configuration
//! vicki config show --config vicki.toml
//! vicki config init vicki.toml
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use vicki::logging::init_logging;
use vicki::VickiConfig;
use vicki::vicki_script::{parse_metablock, Metablock};

#[derive(Parser, Debug)]
#[command(name = "vicki")]
#[command(version)]
#[command(about = "Vicki - inspect VickiScripts and manage runtime configuration", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE", env = "VICKI_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse script metablocks and print what they declare
    Inspect {
        /// Script files
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,

    /// Write the default configuration
    Init {
        /// Destination file
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<VickiConfig> {
    match path {
        Some(path) => Ok(VickiConfig::load(path)?),
        None => Ok(VickiConfig::default()),
    }
}

fn inspect_file(path: &Path) -> anyhow::Result<Metablock> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_metablock(&source).with_context(|| format!("{}", path.display()))
}

fn print_table(metablocks: &[Metablock], invocation: &str) {
    for (index, mb) in metablocks.iter().enumerate() {
        if index > 0 {
            println!();
        }
        println!("{:<12} {}", "id:", mb.id);
        println!("{:<12} {}", "name:", mb.name);
        println!("{:<12} {}", "version:", mb.version);
        if let Some(description) = &mb.description {
            println!("{:<12} {}", "description:", description);
        }
        if let Some(icon) = &mb.icon {
            println!("{:<12} {}", "icon:", icon);
        }
        if !mb.permissions.is_empty() {
            println!("{:<12} {}", "permissions:", mb.permissions.iter().join(", "));
        }
        for utterance in mb.utterances_for(invocation) {
            println!("{:<12} {}", "utterance:", utterance);
        }
        for url in &mb.update_urls {
            println!("{:<12} {}", "update url:", url);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging);
    debug!(command = ?cli.command, "starting");

    match cli.command {
        Commands::Inspect { files, json } => {
            let metablocks = files
                .iter()
                .map(|path| inspect_file(path))
                .collect::<anyhow::Result<Vec<_>>>()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&metablocks)?);
            } else {
                print_table(&metablocks, &config.response.invocation_name);
            }
        }
        Commands::Config { command } => match command {
            ConfigCommand::Show => print!("{}", config.to_toml_string()?),
            ConfigCommand::Init { path, force } => {
                if path.exists() && !force {
                    anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
                }
                std::fs::write(&path, VickiConfig::default().to_toml_string()?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "wrote default configuration");
            }
        },
    }
    Ok(())
}
