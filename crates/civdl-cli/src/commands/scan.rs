use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use civdl_core::{
    api::CivitaiClient,
    ledger::Ledger,
    scanner::{save_metadata, MetadataScanner, ModelMetadata},
    Category,
};
use tracing::warn;

use crate::config::AppConfig;

/// Hash local model files, identify them against the metadata providers,
/// and write a JSON report.
pub async fn run(
    dir: Option<&Path>,
    recursive: bool,
    output: &Path,
    to_ledger: bool,
    cfg: &AppConfig,
) -> anyhow::Result<()> {
    let dirs: Vec<PathBuf> = match dir {
        Some(d) => vec![d.to_path_buf()],
        None => Category::ALL
            .iter()
            .map(|c| cfg.category_dir(*c))
            .collect(),
    };

    let client = CivitaiClient::new(cfg.api_token())?;
    let scanner = MetadataScanner::new(&client);

    let mut results: Vec<ModelMetadata> = Vec::new();
    for dir in &dirs {
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Directory does not exist, skipping");
            continue;
        }
        println!("Scanning {}…", dir.display());
        results.extend(scanner.scan_directory(dir, recursive).await?);
    }

    if results.is_empty() {
        println!("No model files found.");
        return Ok(());
    }

    print_summary(&results);
    save_metadata(&results, output)?;
    println!("Report written to {}", output.display());

    if to_ledger {
        let ledger = Ledger::new(cfg.ledger_path())?;
        let records: Vec<_> = results.iter().filter_map(|m| m.to_record()).collect();
        let (appended, skipped) = super::append_unique(&ledger, &records)?;
        println!("History: {appended} added, {skipped} already present.");
    }

    Ok(())
}

fn print_summary(results: &[ModelMetadata]) {
    let mut by_type: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for metadata in results {
        let entry = by_type.entry(metadata.model_type.as_str()).or_default();
        entry.0 += 1;
        if metadata.from_provider {
            entry.1 += 1;
        }
    }

    println!("\nScanned {} file(s):", results.len());
    for (kind, (total, identified)) in by_type {
        println!("  {kind:<11} {total} file(s), {identified} identified");
    }
}
