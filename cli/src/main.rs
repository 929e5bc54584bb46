//! dirwatch - report file changes in a directory as they happen

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dirwatch_core::{NotifySource, WatchConfig, WatchCoordinator, run};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod display;

use display::Display;

/// Watch a directory and report created, deleted, modified and appended files
#[derive(Parser)]
#[command(name = "dirwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to watch (prompted for when omitted)
    directory: Option<PathBuf>,

    /// Config file (default: <config dir>/dirwatch/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print every event as a JSON object
    #[arg(long)]
    json: bool,

    /// List dot-files too
    #[arg(long)]
    include_hidden: bool,

    /// Treat tabs and line breaks as text when loading content
    #[arg(long)]
    accept_whitespace: bool,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = WatchConfig::load(cli.config.as_deref())?;
    config.include_hidden |= cli.include_hidden;
    config.accept_whitespace |= cli.accept_whitespace;

    let Some(dir) = choose_directory(cli.directory).await? else {
        info!("No directory chosen");
        return Ok(());
    };
    let dir = dir
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", dir.display()))?;

    let (source, mut notifications) = NotifySource::new()?;
    let mut coordinator = WatchCoordinator::new(config);
    let mut events = coordinator.open_directory(&dir, source)?;

    let json = cli.json;
    let printer = tokio::spawn(async move {
        let mut display = Display::new(json);
        while let Some(event) = events.recv().await {
            for line in display.render(&event) {
                println!("{line}");
            }
        }
    });

    tokio::select! {
        _ = run(&mut coordinator, &mut notifications) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("Failed to listen for ctrl-c: {e}");
            }
        }
    }

    coordinator.close_directory();
    printer.await?;
    Ok(())
}

/// Take the directory from the command line, or ask for it on stdin.
///
/// An empty answer cancels.
async fn choose_directory(arg: Option<PathBuf>) -> Result<Option<PathBuf>> {
    if let Some(dir) = arg {
        return Ok(Some(dir));
    }

    eprint!("Watch directory: ");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read directory from stdin")?;

    let answer = line.trim();
    if answer.is_empty() {
        Ok(None)
    } else {
        Ok(Some(PathBuf::from(answer)))
    }
}
