use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use civdl_core::Category;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;

use config::load_config;

/// civdl — Civitai model downloader with resumable transfers and history
#[derive(Debug, Parser)]
#[command(name = "civdl", version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
    /// Path to a custom configuration file (TOML).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log format: "pretty" (default) or "json".
    #[arg(long, global = true, default_value = "pretty", value_name = "FORMAT")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a model by its Civitai URL.
    Get {
        /// Model page URL, e.g. `https://civitai.com/models/649516?modelVersionId=726676`.
        url: String,

        /// Model type: lora, checkpoint or embedding. Detected from API
        /// metadata when omitted; when given, the API type must agree.
        #[arg(long, short = 't')]
        r#type: Option<String>,

        /// Download even if the ledger already has this model.
        #[arg(long)]
        force: bool,

        /// Skip all confirmation prompts (non-interactive mode).
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Show the download history (duplicates collapsed).
    History {
        /// Only show the most recent N entries.
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },

    /// Re-download models recorded in the history.
    Redownload {
        /// 1-based index into the `history` listing.
        index: Option<usize>,

        /// Re-download the history entry with this exact URL.
        #[arg(long, conflicts_with = "index")]
        url: Option<String>,

        /// Re-download every history entry.
        #[arg(long, conflicts_with_all = ["index", "url"])]
        all: bool,

        /// Do not skip entries that are already recorded.
        #[arg(long)]
        force: bool,
    },

    /// Remove duplicate rows from the history (a backup is written first).
    Dedupe,

    /// Identify local model files by content hash and write a metadata report.
    Scan {
        /// Directory to scan. Defaults to the configured download directories.
        dir: Option<PathBuf>,

        /// Descend into subdirectories.
        #[arg(long, short = 'r')]
        recursive: bool,

        /// Where to write the JSON metadata report.
        #[arg(long, short = 'o', default_value = "model_metadata_results.json")]
        output: PathBuf,

        /// Also append the results to the download history.
        #[arg(long)]
        to_ledger: bool,
    },

    /// Append the records from a scan metadata file to the history.
    Import {
        /// JSON metadata file produced by `civdl scan`.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_format);

    let cfg = load_config(cli.config.as_ref()).context("Failed to load configuration")?;

    // Ctrl-C turns into a cooperative cancel so in-flight transfers keep
    // their .part file for the next resume.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupt received, finishing current chunk…");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Get { url, r#type, force, yes } => {
            let type_override = parse_type(r#type.as_deref())?;
            commands::get::run(&url, type_override, force, yes, &cancel, &cfg).await?;
        }
        Commands::History { limit } => {
            commands::history::run(limit, &cfg)?;
        }
        Commands::Redownload { index, url, all, force } => {
            commands::redownload::run(index, url.as_deref(), all, force, &cancel, &cfg).await?;
        }
        Commands::Dedupe => {
            commands::dedupe::run(&cfg)?;
        }
        Commands::Scan { dir, recursive, output, to_ledger } => {
            commands::scan::run(dir.as_deref(), recursive, &output, to_ledger, &cfg).await?;
        }
        Commands::Import { file } => {
            commands::import::run(&file, &cfg)?;
        }
    }

    Ok(())
}

fn parse_type(raw: Option<&str>) -> anyhow::Result<Option<Category>> {
    raw.map(|s| Category::from_str(s).map_err(|e| anyhow::anyhow!(e)))
        .transpose()
}

fn init_tracing(log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}
