//! # datamat CLI
//!
//! Command surface over [`datamat_rag::pipeline::PipelineManager`].
//!
//! ## Usage
//!
//! ```bash
//! datamat --config ./config/datamat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `datamat setup [--force]` | Build the index for the newest dataset |
//! | `datamat ask "<question>"` | Answer a question about the newest dataset |
//! | `datamat health` | Probe the generative backend |
//! | `datamat datasets` | List candidate dataset files |
//! | `datamat stats` | Show the most recent persisted index |
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); results go to stdout.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

use datamat_rag::config::{self, Config};
use datamat_rag::dataset;
use datamat_rag::generation::{GenerativeBackend, OllamaBackend};
use datamat_rag::pipeline::PipelineManager;
use datamat_rag::store;

/// Question answering over the newest uploaded CSV dataset.
#[derive(Parser)]
#[command(
    name = "datamat",
    about = "Retrieval-augmented question answering over an uploaded tabular dataset",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the file does not exist, built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/datamat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index for the newest dataset.
    ///
    /// Reuses the existing index in this process when the dataset is unchanged
    /// unless `--force` is given.
    Setup {
        /// Rebuild even if the dataset has not changed.
        #[arg(long)]
        force: bool,
    },

    /// Answer a question about the newest dataset.
    Ask {
        /// The question, quoted.
        question: String,
    },

    /// Check whether the generative backend is reachable.
    Health,

    /// List candidate dataset files, newest marked with `*`.
    Datasets,

    /// Show counts and metadata of the most recent persisted index.
    Stats,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(config = %path.display(), "config file not found; using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Datasets => {
            let manager = PipelineManager::new(cfg.clone())?;
            let datasets = manager.list_datasets()?;
            if datasets.is_empty() {
                println!("No datasets in {}", cfg.dataset.dir.display());
                return Ok(());
            }
            let active = dataset::select_active(datasets.clone()).map(|d| d.path);
            for d in &datasets {
                let marker = if active.as_ref() == Some(&d.path) { "*" } else { " " };
                println!(
                    "{} {:<40} {:>10}  {}",
                    marker,
                    d.name,
                    format_bytes(d.size_bytes),
                    d.modified.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Commands::Stats => {
            let Some(location) = store::latest_location(&cfg.index.root) else {
                println!("No index under {}", cfg.index.root.display());
                return Ok(());
            };
            let stored = store::inspect(&location).await?;
            println!("Index:       {}", location.display());
            for (key, value) in &stored.meta {
                println!("  {:<18} {}", key, value);
            }
            println!("  {:<18} {}", "stored chunks", stored.chunks);
            println!("  {:<18} {}", "stored embeddings", stored.embeddings);
        }
        Commands::Health => {
            let backend = OllamaBackend::new(&cfg.generation)?;
            if let Err(e) = backend.probe().await {
                tracing::debug!(error = %e, "health probe failed");
                bail!("generative backend unreachable at {}", cfg.generation.base_url);
            }
            println!("ok {}", cfg.generation.base_url);
        }
        Commands::Setup { force } => {
            let manager = PipelineManager::new(cfg.clone())?;
            match manager.setup(force).await? {
                Some(chain) => {
                    let stats = chain.stats();
                    println!(
                        "Indexed {} ({} rows, {} chunks, {} dims) at {}",
                        stats.dataset.display(),
                        stats.rows,
                        stats.chunks,
                        stats.dims,
                        stats.location.display()
                    );
                }
                None => println!("No dataset found in {}", cfg.dataset.dir.display()),
            }
        }
        Commands::Ask { question } => {
            let manager = PipelineManager::new(cfg)?;
            manager.setup(false).await.context("pipeline setup failed")?;
            let answer = manager.ask(&question).await?;
            println!("{}", answer);
        }
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
