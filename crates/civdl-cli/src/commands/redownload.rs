use anyhow::{bail, Context};
use civdl_core::{
    error::CoreError,
    ledger::{DownloadRecord, Ledger},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;

/// Re-download models from the history, selected by index, URL, or all.
pub async fn run(
    index: Option<usize>,
    url: Option<&str>,
    all: bool,
    force: bool,
    cancel: &CancellationToken,
    cfg: &AppConfig,
) -> anyhow::Result<()> {
    let ledger = Ledger::new(cfg.ledger_path())?;
    let records = ledger.all_records(true)?;

    if records.is_empty() {
        println!("No downloads recorded yet.");
        return Ok(());
    }

    let targets: Vec<DownloadRecord> = if all {
        records
    } else if let Some(i) = index {
        if i == 0 || i > records.len() {
            bail!(
                "Index {i} out of range; history has {} entries (see `civdl history`)",
                records.len()
            );
        }
        vec![records[i - 1].clone()]
    } else if let Some(u) = url {
        let record = ledger
            .find_by_url(u)?
            .with_context(|| format!("No history entry with URL {u}"))?;
        vec![record]
    } else {
        bail!("Pass an index, --url <URL>, or --all");
    };

    let batch = targets.len() > 1;
    let mut downloaded = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for record in &targets {
        // Single-target redownloads always run; only --all defers to the
        // existing file on disk via the ledger unless forced.
        if batch && !force {
            let present = cfg
                .category_dir(record.model_type)
                .join(&record.filename)
                .exists();
            if present {
                info!(file = %record.filename, "Already on disk, skipping");
                skipped += 1;
                continue;
            }
        }

        match super::get::run(&record.url, Some(record.model_type), true, true, cancel, cfg)
            .await
        {
            Ok(()) => downloaded += 1,
            Err(e) => {
                if matches!(e.downcast_ref::<CoreError>(), Some(CoreError::Cancelled)) {
                    println!("Cancelled after {downloaded} download(s).");
                    return Ok(());
                }
                error!(url = %record.url, error = %e, "Re-download failed");
                failed += 1;
            }
        }
    }

    if batch {
        println!("Done: {downloaded} downloaded, {skipped} skipped, {failed} failed.");
    }

    Ok(())
}
