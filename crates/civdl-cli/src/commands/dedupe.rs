use civdl_core::ledger::Ledger;

use crate::config::AppConfig;

/// Rewrite the history with duplicate rows removed. The pre-compaction file
/// is kept next to the ledger as `<name>.backup`.
pub fn run(cfg: &AppConfig) -> anyhow::Result<()> {
    let ledger = Ledger::new(cfg.ledger_path())?;
    let removed = ledger.compact()?;

    if removed == 0 {
        println!("No duplicates found.");
    } else {
        println!(
            "Removed {removed} duplicate row(s); original saved as {}.backup",
            ledger.path().display()
        );
    }

    Ok(())
}
