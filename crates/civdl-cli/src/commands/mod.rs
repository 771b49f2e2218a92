pub mod dedupe;
pub mod get;
pub mod history;
pub mod import;
pub mod redownload;
pub mod scan;

use civdl_core::ledger::{DownloadRecord, Ledger};

/// Append records to the ledger, skipping rows already present. Returns
/// (appended, skipped).
pub(crate) fn append_unique(
    ledger: &Ledger,
    records: &[DownloadRecord],
) -> anyhow::Result<(usize, usize)> {
    let mut appended = 0;
    let mut skipped = 0;
    for record in records {
        let duplicate = match (record.model_id, record.version_id) {
            (Some(m), Some(v)) => ledger.is_duplicate(m, v)?,
            _ => ledger.is_duplicate_url(&record.url)?,
        };
        if duplicate {
            skipped += 1;
            continue;
        }
        ledger.record(record)?;
        appended += 1;
    }
    Ok((appended, skipped))
}
