//! Hierloom CLI
//!
//! Replays scenario scripts against a session of entity documents:
//! - archetypes and the documents instantiated from them
//! - user edits (add, remove, delete, move, rename, unlink)
//! - the resulting hierarchies and the part event log

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use hierloom_sync::SessionConfig;
use std::fs;
use std::path::{Path, PathBuf};

mod render;
mod replay;
mod scenario;

use render::Report;
use replay::Replay;
use scenario::Scenario;

#[derive(Parser)]
#[command(name = "hierloom")]
#[command(author, version, about = "Hierloom: archetype hierarchy synchronization")]
struct Cli {
    /// Log propagation decisions (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario and print the resulting hierarchies and part events.
    Replay {
        /// Scenario JSON file
        script: PathBuf,
        /// Session config JSON file
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
        /// Disable ANSI colors
        #[arg(long)]
        no_color: bool,
    },
    /// Parse a scenario without running it.
    Check {
        /// Scenario JSON file
        script: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("hierloom_sync=debug,hierloom_cli=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    match cli.command {
        Commands::Replay {
            script,
            config,
            format,
            no_color,
        } => {
            if no_color {
                colored::control::set_override(false);
            }
            cmd_replay(&script, config.as_deref(), format)?;
        }
        Commands::Check { script } => {
            cmd_check(&script)?;
        }
    }
    Ok(())
}

fn read_scenario(path: &Path) -> Result<Scenario> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse scenario {}", path.display()))
}

fn read_config(path: Option<&Path>) -> Result<SessionConfig> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    SessionConfig::from_json_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))
}

fn cmd_replay(script: &Path, config: Option<&Path>, format: Format) -> Result<()> {
    let scenario = read_scenario(script)?;
    let config = match &scenario.config {
        Some(inline) => inline.clone(),
        None => read_config(config)?,
    };
    tracing::debug!(?config, script = %script.display(), "replaying scenario");

    let mut replay = Replay::new(config);
    replay.run(&scenario)?;
    let report = Report::from_replay(&replay);
    match format {
        Format::Text => print!("{}", report.to_text()),
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn cmd_check(script: &Path) -> Result<()> {
    let scenario = read_scenario(script)?;
    let parts: usize = scenario
        .documents
        .iter()
        .map(|d| count_parts(&d.parts))
        .sum();
    println!(
        "{} {} documents, {} parts, {} steps",
        "ok".green().bold(),
        scenario.documents.len(),
        parts,
        scenario.steps.len()
    );
    Ok(())
}

fn count_parts(parts: &[scenario::EntitySpec]) -> usize {
    parts.iter().map(|p| 1 + count_parts(&p.children)).sum()
}
