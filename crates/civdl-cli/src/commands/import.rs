use std::path::Path;

use anyhow::Context;
use civdl_core::{ledger::Ledger, scanner::load_metadata};
use tracing::debug;

use crate::config::AppConfig;

/// Append the identified entries of a scan report to the download history.
pub fn run(file: &Path, cfg: &AppConfig) -> anyhow::Result<()> {
    let metadata = load_metadata(file)
        .with_context(|| format!("Failed to read metadata file {}", file.display()))?;

    let mut records = Vec::new();
    let mut unidentified = 0usize;
    for entry in &metadata {
        match entry.to_record() {
            Some(record) => records.push(record),
            None => {
                debug!(file = %entry.file_name, "No URL known, not importable");
                unidentified += 1;
            }
        }
    }

    let ledger = Ledger::new(cfg.ledger_path())?;
    let (appended, skipped) = super::append_unique(&ledger, &records)?;

    println!(
        "Imported {appended} entr(ies); {skipped} already present, {unidentified} unidentified."
    );

    Ok(())
}
