use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classify::Category;
use crate::error::{CoreError, CoreResult};

/// Column order of the ledger CSV. Serde field order must match.
const CSV_HEADERS: [&str; 8] = [
    "timestamp",
    "model_type",
    "url",
    "filename",
    "model_id",
    "version_id",
    "file_size",
    "file_size_bytes",
];

/// One completed download, as stored in the ledger.
///
/// `(model_id, version_id)` is the primary identity when both are present;
/// the source URL is the fallback. Records are immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub timestamp: String,
    pub model_type: Category,
    pub url: String,
    pub filename: String,
    pub model_id: Option<u64>,
    pub version_id: Option<u64>,
    pub file_size: String,
    pub file_size_bytes: Option<u64>,
}

impl DownloadRecord {
    pub fn new(
        model_type: Category,
        url: impl Into<String>,
        filename: impl Into<String>,
        model_id: Option<u64>,
        version_id: Option<u64>,
        file_size_bytes: Option<u64>,
    ) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            model_type,
            url: url.into(),
            filename: filename.into(),
            model_id,
            version_id,
            file_size: file_size_bytes.map_or_else(|| "Unknown".to_string(), human_size),
            file_size_bytes,
        }
    }
}

/// Format a byte count as a human-readable size, e.g. `1.23 GB`.
pub fn human_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}

/// Append-only download history backed by a CSV file.
///
/// Single-writer: callers running batch downloads must serialize calls to
/// [`Ledger::record`]. Duplicate detection by URL is known to miss models
/// reachable through several URL variants (with/without slug or version id);
/// the id-based key does not have that problem.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Open (or create) a ledger at `path`. A missing file is created with
    /// the header row; missing parent directories are created too.
    pub fn new(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path: PathBuf = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let ledger = Self { path };
        ledger.ensure_header()?;
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_header(&self) -> CoreResult<()> {
        if self.path.exists() {
            return Ok(());
        }
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(CSV_HEADERS)?;
        writer.flush()?;
        debug!(path = %self.path.display(), "Created ledger with header row");
        Ok(())
    }

    /// Append one record.
    ///
    /// The row is serialized to an in-memory buffer first and written with a
    /// single call, so a failure cannot leave a torn row in front of later
    /// appends.
    pub fn record(&self, record: &DownloadRecord) -> CoreResult<()> {
        self.ensure_header()?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.serialize(record)?;
        let row = writer
            .into_inner()
            .map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?;

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)?;
        file.write_all(&row)?;
        file.flush()?;

        info!(filename = %record.filename, "Recorded download in ledger");
        Ok(())
    }

    /// All records in append order, optionally collapsed under the dedup rule.
    pub fn all_records(&self, dedupe: bool) -> CoreResult<Vec<DownloadRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            let record: DownloadRecord = row?;
            records.push(record);
        }

        if dedupe {
            Ok(dedupe_records(records))
        } else {
            Ok(records)
        }
    }

    /// The last `count` records, oldest first.
    pub fn recent(&self, count: usize) -> CoreResult<Vec<DownloadRecord>> {
        let mut records = self.all_records(false)?;
        if records.len() > count {
            records.drain(..records.len() - count);
        }
        Ok(records)
    }

    /// True iff a record exists with this exact `(model_id, version_id)` pair.
    pub fn is_duplicate(&self, model_id: u64, version_id: u64) -> CoreResult<bool> {
        Ok(self.all_records(false)?.iter().any(|r| {
            r.model_id == Some(model_id) && r.version_id == Some(version_id)
        }))
    }

    /// True iff any record's source URL matches exactly.
    pub fn is_duplicate_url(&self, url: &str) -> CoreResult<bool> {
        Ok(self.all_records(false)?.iter().any(|r| r.url == url))
    }

    /// The first (deduplicated) record with this source URL, if any.
    pub fn find_by_url(&self, url: &str) -> CoreResult<Option<DownloadRecord>> {
        Ok(self
            .all_records(true)?
            .into_iter()
            .find(|r| r.url == url))
    }

    /// Rewrite the ledger with duplicates removed, after writing a verbatim
    /// backup alongside it (`<path>.backup`). Returns the number of rows
    /// dropped; nothing is written when there are no duplicates.
    pub fn compact(&self) -> CoreResult<usize> {
        let originals = self.all_records(false)?;
        let unique = dedupe_records(originals.clone());
        let removed = originals.len() - unique.len();

        if removed == 0 {
            return Ok(0);
        }

        let backup_path = backup_path(&self.path);
        std::fs::copy(&self.path, &backup_path)?;

        // Same no-auto-header setup as record(): the explicit header row is
        // the only one.
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&self.path)?;
        writer.write_record(CSV_HEADERS)?;
        for record in &unique {
            writer.serialize(record)?;
        }
        writer.flush()?;

        info!(
            removed,
            backup = %backup_path.display(),
            "Compacted ledger"
        );
        Ok(removed)
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".backup");
    PathBuf::from(os)
}

/// Collapse records under the dedup rule: prefer the `(model_id, version_id)`
/// identity when both sides are present, else fall back to the URL. First
/// occurrence wins.
fn dedupe_records(records: Vec<DownloadRecord>) -> Vec<DownloadRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::new();

    for record in records {
        let key = match (record.model_id, record.version_id) {
            (Some(m), Some(v)) => format!("id:{m}:{v}"),
            _ if !record.url.is_empty() => format!("url:{}", record.url),
            _ => continue,
        };
        if seen.insert(key) {
            unique.push(record);
        }
    }

    unique
}
