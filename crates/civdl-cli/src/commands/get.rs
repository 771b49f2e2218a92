use std::io::{self, Write};

use anyhow::{bail, Context};
use civdl_core::{
    api::CivitaiClient,
    classify::classify_provider_type,
    ledger::{human_size, DownloadRecord, Ledger},
    transfer::TransferEngine,
    urls::parse_model_url,
    Category,
};
use indicatif::MultiProgress;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;

/// Download a model from its Civitai page URL and record it in the ledger.
pub async fn run(
    url: &str,
    type_override: Option<Category>,
    force: bool,
    yes: bool,
    cancel: &CancellationToken,
    cfg: &AppConfig,
) -> anyhow::Result<()> {
    let ledger = Ledger::new(cfg.ledger_path())?;
    let (model_id, version_id) = parse_model_url(url)?;

    if !force {
        let duplicate = match version_id {
            Some(v) => ledger.is_duplicate(model_id, v)? || ledger.is_duplicate_url(url)?,
            None => ledger.is_duplicate_url(url)?,
        };
        if duplicate {
            println!("Already downloaded (use --force to download again):");
            if let Some(record) = ledger.find_by_url(url)? {
                print_record(&record);
            }
            return Ok(());
        }
    }

    let client = CivitaiClient::new(cfg.api_token())?;
    let version = client
        .version_info(model_id, version_id)
        .await
        .context("Failed to fetch model metadata")?;

    let raw_type = version
        .model
        .as_ref()
        .and_then(|m| m.kind.clone())
        .unwrap_or_default();
    let category = resolve_category(type_override, &raw_type)?;

    let file = version
        .primary_model_file()
        .ok_or_else(|| anyhow::anyhow!("Version has no primary model file"))?;
    let file_name = file
        .name
        .clone()
        .ok_or_else(|| anyhow::anyhow!("Primary model file has no name"))?;
    let download_url = file
        .download_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("Primary model file has no download URL"))?;

    let model_name = version
        .model
        .as_ref()
        .and_then(|m| m.name.as_deref())
        .unwrap_or("(unnamed)");
    println!("Model:    {model_name}");
    println!("Version:  {}", version.name.as_deref().unwrap_or("(unnamed)"));
    println!("Type:     {category}");
    println!("File:     {file_name}");
    if let Some(kb) = file.size_kb {
        println!("Size:     {}", human_size((kb * 1024.0) as u64));
    }

    if !yes && !force && !confirm("Download?")? {
        println!("Aborted.");
        return Ok(());
    }

    let dir = cfg
        .download_dir(category)
        .context("Failed to create download directory")?;
    let dest = dir.join(&file_name);

    let progress = MultiProgress::new();
    let engine = TransferEngine::new(&client);
    let outcome = engine
        .download(&download_url, &dest, Some(&progress), Some(cancel))
        .await?;

    info!(
        file = %file_name,
        bytes = outcome.bytes_transferred,
        resumed_from = outcome.resumed_from,
        "Download complete"
    );
    println!(
        "Saved {} ({}) in {:.1}s",
        dest.display(),
        human_size(outcome.total_bytes.unwrap_or(outcome.bytes_transferred)),
        outcome.elapsed.as_secs_f64()
    );

    let record = DownloadRecord::new(
        category,
        version.page_url().unwrap_or_else(|| url.to_string()),
        &file_name,
        version.model_id.or(Some(model_id)),
        version.id.or(version_id),
        outcome.total_bytes.or(Some(outcome.bytes_transferred)),
    );
    // Forced and batch re-downloads refresh the file but must not stack
    // duplicate ledger rows.
    match super::append_unique(&ledger, std::slice::from_ref(&record)) {
        Ok((0, _)) => debug!(filename = %file_name, "Already recorded in history"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Downloaded but could not record in history"),
    }

    Ok(())
}

/// Settle the model category from the provider's raw type string and an
/// optional user override. An override must agree with a recognized
/// provider type; it is trusted outright when the provider type is
/// unrecognized.
fn resolve_category(
    type_override: Option<Category>,
    raw_type: &str,
) -> anyhow::Result<Category> {
    let (detected, reason) = classify_provider_type(raw_type);

    match (type_override, detected) {
        (Some(wanted), Some(found)) if wanted == found => Ok(wanted),
        (Some(wanted), Some(found)) => bail!(
            "Requested type '{wanted}' but Civitai reports '{raw_type}' ({found})"
        ),
        (Some(wanted), None) => {
            warn!(%reason, "Civitai model type unrecognized, trusting --type");
            Ok(wanted)
        }
        (None, Some(found)) => Ok(found),
        (None, None) => bail!(
            "Cannot classify this model ({reason}); pass --type lora|checkpoint|embedding"
        ),
    }
}

fn print_record(record: &DownloadRecord) {
    println!(
        "  {}  [{}]  {}  ({})",
        record.timestamp, record.model_type, record.filename, record.file_size
    );
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
