//! Warden CLI
//!
//! Offline operator tooling for a Warden agent's configuration and data.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use warden_agent::{AppState, Dataset, FileStore, Settings};
use warden_exchange::receive;
use warden_runtime::route_envelope;

#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about = "Warden: federated moderation agent tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the agent configuration
    #[arg(short, long, global = true, env = "WARDEN_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and load every dataset
    Check,

    /// Print a dataset as JSON
    Inspect {
        /// Dataset name, e.g. user_ids or ban_words
        dataset: String,
    },

    /// Read an envelope from stdin and show how it would be handled
    Route,

    /// Run the monthly reset against the data directory
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match cli.command {
        Commands::Check => check(&cli.config)?,
        Commands::Inspect { dataset } => inspect(&cli.config, &dataset).await?,
        Commands::Route => route(&cli.config)?,
        Commands::Reset => reset(&cli.config).await?,
    }

    Ok(())
}

fn load_settings(path: &Path) -> Result<Settings> {
    Settings::load(path).with_context(|| format!("loading {}", path.display()))
}

fn open_state(settings: Settings) -> Result<AppState> {
    let store = FileStore::open(&settings.paths.data_dir)?;
    let state = AppState::load(settings, Arc::new(store)).context("loading datasets")?;
    Ok(state)
}

fn check(path: &Path) -> Result<()> {
    let settings = load_settings(path)?;
    let sender = settings.sender().to_string();
    let data_dir = settings.paths.data_dir.clone();

    let state = open_state(settings)?;
    println!("✅ {} configuration OK", sender);
    println!("   Data: {}", data_dir.display());
    println!("   Groups: {}", state.groups().len());
    println!(
        "   Rule categories: {}",
        state
            .rules()
            .categories()
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}

async fn inspect(path: &Path, name: &str) -> Result<()> {
    let dataset: Dataset = name.parse()?;
    let state = open_state(load_settings(path)?)?;

    let value = state.dataset_value(dataset).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn route(path: &Path) -> Result<()> {
    let settings = load_settings(path)?;

    let mut text = String::new();
    std::io::stdin().read_to_string(&mut text)?;

    let Some(envelope) = receive(Some(&text)) else {
        println!("ignored (not an envelope)");
        return Ok(());
    };

    match route_envelope(&envelope, settings.sender()) {
        Some(handler) => println!(
            "{} {}/{} -> {}",
            envelope.from, envelope.action, envelope.action_type, handler
        ),
        None => println!("ignored"),
    }
    Ok(())
}

async fn reset(path: &Path) -> Result<()> {
    let settings = load_settings(path)?;
    let reset_day = settings.time.reset_day;

    let today = Utc::now().day();
    if today != reset_day {
        info!("Resetting on day {} (scheduled day is {})", today, reset_day);
    }

    let state = open_state(settings)?;
    state.reset_data().await;
    println!("✅ Monthly reset done at {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
    Ok(())
}
