use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use reqwest::header::{AUTHORIZATION, RANGE};
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::CivitaiClient;
use crate::error::{CoreError, CoreResult};

/// Suffix marking an in-progress transfer next to its destination.
pub const PART_SUFFIX: &str = ".part";

/// Progress bar template for files whose `Content-Length` is known.
const PB_TEMPLATE_SIZED: &str =
    "{wide_msg}\n[{bar:50.cyan/blue}] {bytes}/{total_bytes}  {bytes_per_sec}  ETA {eta}";

/// Progress bar template when the total size is not known.
const PB_TEMPLATE_SPINNER: &str =
    "{spinner:.green} {wide_msg}  {bytes}  {bytes_per_sec}  [{elapsed_precise}]";

/// Summary of one finished transfer.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// Bytes in the final file, including any resumed prefix.
    pub bytes_transferred: u64,
    /// Offset the transfer resumed from (0 for a fresh download).
    pub resumed_from: u64,
    /// Total size as reported by the server, when known.
    pub total_bytes: Option<u64>,
    pub elapsed: Duration,
}

impl TransferOutcome {
    /// Average throughput over the bytes actually fetched this run.
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.bytes_transferred - self.resumed_from) as f64 / secs
        } else {
            0.0
        }
    }
}

/// Streams one remote file to a destination path, resuming a previous
/// partial attempt when a `.part` file is present.
///
/// The `.part` file is never deleted on failure or cancellation; the rename
/// onto the final path is the single point at which a transfer becomes
/// visible as complete.
pub struct TransferEngine {
    http: reqwest::Client,
    token: Option<String>,
}

impl TransferEngine {
    pub fn new(client: &CivitaiClient) -> Self {
        Self {
            http: client.http().clone(),
            token: client.token().map(String::from),
        }
    }

    /// Fetch `url` into `dest`. Progress is rendered through `mp` when
    /// given; `cancel` is polled between chunk writes.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        mp: Option<&MultiProgress>,
        cancel: Option<&CancellationToken>,
    ) -> CoreResult<TransferOutcome> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let part = part_path(dest);
        let mut resume_offset = match tokio::fs::metadata(&part).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if resume_offset > 0 {
            info!(offset = resume_offset, "Resuming from partial file");
        }

        let mut req = self.http.get(url);
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if resume_offset > 0 {
            req = req.header(RANGE, format!("bytes={resume_offset}-"));
        }

        let display_name = file_name_of(dest);
        let response = req.send().await.map_err(|e| CoreError::Transfer {
            file: display_name.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let total_bytes = match status {
            StatusCode::OK => {
                // Full body despite the range request: the partial prefix is
                // unusable, start over.
                if resume_offset > 0 {
                    warn!("Server ignored the range request, restarting from zero");
                    tokio::fs::remove_file(&part).await?;
                    resume_offset = 0;
                }
                response.content_length()
            }
            StatusCode::PARTIAL_CONTENT => response.content_length().map(|rest| rest + resume_offset),
            StatusCode::UNAUTHORIZED => {
                return Err(CoreError::Auth(
                    "download rejected: API token missing or invalid".to_string(),
                ));
            }
            StatusCode::FORBIDDEN => {
                return Err(CoreError::Auth(
                    "access denied: this may be an early-access model".to_string(),
                ));
            }
            StatusCode::NOT_FOUND => {
                return Err(CoreError::NotFound(format!("download URL: {url}")));
            }
            other => {
                return Err(CoreError::Transfer {
                    file: display_name,
                    reason: format!("unexpected HTTP status {other}"),
                });
            }
        };

        let pb = mp.map(|m| make_progress_bar(m, &display_name, total_bytes, resume_offset));

        let mut file = if resume_offset > 0 {
            tokio::fs::OpenOptions::new().append(true).open(&part).await?
        } else {
            tokio::fs::File::create(&part).await?
        };

        let start = Instant::now();
        let mut downloaded = resume_offset;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    file.flush().await?;
                    if let Some(pb) = &pb {
                        pb.abandon_with_message(format!("Cancelled  {display_name}"));
                    }
                    info!(bytes = downloaded, "Cancelled, partial file kept for resume");
                    return Err(CoreError::Cancelled);
                }
            }

            let chunk = chunk.map_err(|e| CoreError::Transfer {
                file: display_name.clone(),
                reason: format!("read failed: {e}"),
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| CoreError::Transfer {
                    file: display_name.clone(),
                    reason: format!("write failed: {e}"),
                })?;
            downloaded += chunk.len() as u64;
            if let Some(pb) = &pb {
                pb.inc(chunk.len() as u64);
            }
        }

        file.flush().await?;
        drop(file);

        // Publish: clear any stale destination, then promote atomically.
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            tokio::fs::remove_file(dest).await?;
        }
        tokio::fs::rename(&part, dest).await?;

        if let Some(pb) = &pb {
            pb.finish_with_message(format!("Done  {display_name}"));
        }

        let outcome = TransferOutcome {
            bytes_transferred: downloaded,
            resumed_from: resume_offset,
            total_bytes,
            elapsed: start.elapsed(),
        };
        info!(
            file = %display_name,
            bytes = outcome.bytes_transferred,
            resumed_from = outcome.resumed_from,
            "Transfer complete"
        );
        Ok(outcome)
    }
}

/// `<dest>.part`, alongside the destination.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut os = dest.as_os_str().to_owned();
    os.push(PART_SUFFIX);
    PathBuf::from(os)
}

fn file_name_of(dest: &Path) -> String {
    dest.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| dest.to_string_lossy().to_string())
}

fn make_progress_bar(
    mp: &MultiProgress,
    name: &str,
    total: Option<u64>,
    position: u64,
) -> ProgressBar {
    match total {
        Some(total) => {
            let pb = mp.add(ProgressBar::new(total));
            pb.set_style(
                ProgressStyle::with_template(PB_TEMPLATE_SIZED)
                    .expect("static template")
                    .progress_chars("##-"),
            );
            pb.set_message(name.to_string());
            pb.set_position(position);
            pb
        }
        None => {
            let pb = mp.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template(PB_TEMPLATE_SPINNER).expect("static template"));
            pb.set_message(name.to_string());
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}
