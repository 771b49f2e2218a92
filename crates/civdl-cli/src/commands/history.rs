use civdl_core::ledger::Ledger;

use crate::config::AppConfig;

/// Print the download history, newest last, with duplicates collapsed.
/// With a limit, only the most recent entries are shown.
pub fn run(limit: Option<usize>, cfg: &AppConfig) -> anyhow::Result<()> {
    let ledger = Ledger::new(cfg.ledger_path())?;
    let records = match limit {
        Some(n) => ledger.recent(n)?,
        None => ledger.all_records(true)?,
    };

    if records.is_empty() {
        println!("No downloads recorded yet.");
        return Ok(());
    }

    println!(
        "{:<4} {:<20} {:<11} {:<40} {:>10}  {}",
        "#", "Date", "Type", "Filename", "Size", "URL"
    );
    for (i, record) in records.iter().enumerate() {
        println!(
            "{:<4} {:<20} {:<11} {:<40} {:>10}  {}",
            i + 1,
            record.timestamp,
            record.model_type.to_string(),
            record.filename,
            record.file_size,
            record.url,
        );
    }
    println!("\n{} model(s) in {}", records.len(), ledger.path().display());

    Ok(())
}
