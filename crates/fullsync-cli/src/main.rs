//! # fullsync CLI
//!
//! Command-line driver for the fullsync orchestrator, backed by a local
//! filesystem "search backend".
//!
//! ## Commands
//!
//! - `fullsync sync` - Start or resume a full sync
//! - `fullsync status` - Show the run in progress and the last report
//! - `fullsync cancel` - Abandon the run in progress
//! - `fullsync reindexing <indexable>` - Ask whether an index is being rebuilt
//!
//! ## Example Usage
//!
//! ```bash
//! # Rebuild every index from scratch
//! fullsync sync --put-mapping
//!
//! # Advance an interrupted run by five steps only
//! fullsync sync --steps 5
//!
//! # Is the post index of site 2 being rebuilt?
//! fullsync reindexing post --tenant 2
//! ```

mod app;
mod commands;
mod local;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// fullsync - Resumable full reindexing
#[derive(Parser)]
#[command(name = "fullsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "FULLSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a full sync, or resume the interrupted one
    Sync {
        /// Delete and recreate every index before filling it
        #[arg(short, long)]
        put_mapping: bool,

        /// Only sync these indexables (can be used multiple times)
        #[arg(short, long)]
        indexables: Vec<String>,

        /// Stop after this many steps, leaving the rest checkpointed
        #[arg(short, long)]
        steps: Option<usize>,

        /// Extra option passed to hooks as key=value (can be used multiple times)
        #[arg(short = 'o', long = "option", value_parser = parse_option)]
        options: Vec<(String, String)>,
    },

    /// Show the run in progress and the last report
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        output: OutputFormat,
    },

    /// Abandon the run in progress
    Cancel {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Report whether an indexable is currently being rebuilt
    Reindexing {
        /// Indexable name
        indexable: String,

        /// Tenant id (omit for global indexables)
        #[arg(short, long)]
        tenant: Option<u64>,
    },
}

#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

fn parse_option(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Expected key=value, got: {}", s)),
    }
}

/// Log filter for the verbosity flags, falling back to the configured level
fn log_filter(quiet: bool, verbose: u8, configured: &str) -> &str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => configured,
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config {
        Some(path) => path,
        None => fullsync_core::Config::default_config_path()?,
    };
    let config = fullsync_core::Config::load_from(&config_path)?;

    // Setup logging
    let log_level = log_filter(cli.quiet, cli.verbose, &config.general.log_level);
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    let local = local::LocalConfig::load_from(&config_path)?;
    let app = app::App::new(config, local)?;

    // Execute command
    match cli.command {
        Commands::Sync {
            put_mapping,
            indexables,
            steps,
            options,
        } => commands::sync::run(&app, put_mapping, indexables, steps, options, cli.quiet),
        Commands::Status { output } => commands::status::run(&app, output),
        Commands::Cancel { yes } => commands::cancel::run(&app, yes),
        Commands::Reindexing { indexable, tenant } => {
            commands::reindexing::run(&app, &indexable, tenant)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option() {
        assert_eq!(
            parse_option("batch=a=b").unwrap(),
            ("batch".to_string(), "a=b".to_string())
        );
        assert!(parse_option("novalue").is_err());
        assert!(parse_option("=x").is_err());
    }

    #[test]
    fn test_log_filter_prefers_flags() {
        assert_eq!(log_filter(false, 0, "debug"), "debug");
        assert_eq!(log_filter(false, 1, "error"), "info");
        assert_eq!(log_filter(false, 3, "warn"), "trace");
        assert_eq!(log_filter(true, 2, "debug"), "error");
    }

    #[test]
    fn test_cli_parses_sync() {
        let cli = Cli::try_parse_from([
            "fullsync", "sync", "--put-mapping", "-i", "post", "-i", "user", "--steps", "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Sync {
                put_mapping,
                indexables,
                steps,
                ..
            } => {
                assert!(put_mapping);
                assert_eq!(indexables, vec!["post", "user"]);
                assert_eq!(steps, Some(3));
            }
            _ => panic!("expected sync"),
        }
    }
}
