//! Attachment download orchestration
//!
//! Lists the attachments matching a filter once, then pushes each one through
//! owner resolution, directory preparation, path reservation and streaming,
//! with at most `concurrency` attachments in that pipeline at a time.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{AttachmentRecord, AttachmentState, OwnerLabel};
use crate::paths::PathResolver;
use crate::servicenow::{RecordClient, SnowError};

pub mod progress;
pub mod retry;

pub use progress::{FailedAttachment, ProgressTracker, RunSummary};
pub use retry::{with_retry, RetryPolicy};

type OwnerKey = (String, String);

/// Downloads every attachment matching a filter into `<base>/<table>/<label>/`
#[derive(Debug)]
pub struct Downloader {
    client: RecordClient,
    resolver: PathResolver,
    retry: RetryPolicy,
    concurrency: usize,
    keep_partial_files: bool,
    owner_cache: Option<Mutex<HashMap<OwnerKey, Arc<OnceCell<OwnerLabel>>>>>,
}

/// Download attachments with the given configuration
pub async fn download_attachments(
    config: &Config,
    cancel: &CancellationToken,
) -> Result<RunSummary, SnowError> {
    let downloader = Downloader::new(config)?;
    downloader.run(&config.attachment_filter, cancel).await
}

impl Downloader {
    pub fn new(config: &Config) -> Result<Self, SnowError> {
        let client = RecordClient::new(config)?;
        Ok(Self {
            client,
            resolver: PathResolver::new(&config.download_dir),
            retry: config.retry.policy(),
            concurrency: config.concurrency.max(1),
            keep_partial_files: config.keep_partial_files,
            owner_cache: config
                .cache_owner_labels
                .then(|| Mutex::new(HashMap::new())),
        })
    }

    /// Run a whole batch.
    ///
    /// Only a failed attachment listing is returned as an error; per-attachment
    /// failures are collected in the summary.
    pub async fn run(
        &self,
        filter: &str,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, SnowError> {
        info!("Querying attachments matching: {}", filter);
        let records = with_retry(&self.retry, cancel, "attachment listing", || {
            self.client.list_attachments(filter)
        })
        .await?;

        let progress = ProgressTracker::new(records.len());
        info!(
            "Found {} attachments, downloading with up to {} in flight",
            records.len(),
            self.concurrency
        );

        stream::iter(records)
            .map(|record| self.dispatch(record, &progress, cancel))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<()>>()
            .await;

        let summary = progress.summary();
        info!(
            "Finished: {} of {} attachments downloaded, {} failed, {} skipped ({} bytes)",
            summary.completed,
            summary.total,
            summary.failed_count(),
            summary.skipped,
            summary.bytes_written
        );
        Ok(summary)
    }

    /// Take one attachment from `Listed` to `Done` or `Failed`
    async fn dispatch(
        &self,
        record: AttachmentRecord,
        progress: &ProgressTracker,
        cancel: &CancellationToken,
    ) {
        debug!(attachment = %record.id, state = AttachmentState::Listed.as_str());
        if cancel.is_cancelled() {
            debug!(attachment = %record.id, "Run cancelled, not dispatching");
            progress.record_skipped();
            return;
        }

        progress.start();
        match self.process(&record, cancel).await {
            Ok((path, bytes)) => {
                let percent = progress.record_done(bytes);
                debug!(attachment = %record.id, state = AttachmentState::Done.as_str());
                info!(
                    "[{:>3}%] Downloaded {} ({} bytes) to {}",
                    percent,
                    record.file_name,
                    bytes,
                    path.display()
                );
            }
            Err(e) => {
                warn!(
                    attachment = %record.id,
                    kind = %e.kind(),
                    state = AttachmentState::Failed.as_str(),
                    "Failed to download {}: {}",
                    record.file_name,
                    e
                );
                progress.record_failure(FailedAttachment {
                    id: record.id.clone(),
                    file_name: record.file_name.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }

    async fn process(
        &self,
        record: &AttachmentRecord,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, u64), SnowError> {
        self.resolver
            .ensure_directory(&self.resolver.table_dir(&record.owner_table))
            .await?;

        debug!(attachment = %record.id, state = AttachmentState::OwnerResolving.as_str());
        let label = self.resolve_owner(record, cancel).await?;

        let dir = self
            .resolver
            .ensure_directory(&self.resolver.owner_dir(&record.owner_table, &label))
            .await?;
        debug!(attachment = %record.id, state = AttachmentState::DirectoryReady.as_str(), dir = %dir.display());

        if cancel.is_cancelled() {
            return Err(SnowError::Cancelled);
        }

        let path = self
            .resolver
            .reserve_file(&dir, &record.file_name, &record.id)
            .await?;

        debug!(attachment = %record.id, state = AttachmentState::Downloading.as_str(), path = %path.display());
        let streamed = with_retry(&self.retry, cancel, "attachment download", || {
            self.client.stream_attachment(&record.id, &path, cancel)
        })
        .await;

        match streamed {
            Ok(bytes) => Ok((path, bytes)),
            Err(e) => {
                self.discard_partial(&path, &e).await;
                Err(e)
            }
        }
    }

    async fn resolve_owner(
        &self,
        record: &AttachmentRecord,
        cancel: &CancellationToken,
    ) -> Result<OwnerLabel, SnowError> {
        let fetch = move || {
            with_retry(&self.retry, cancel, "owner lookup", move || {
                self.client
                    .resolve_owner_label(&record.owner_table, &record.owner_record_id)
            })
        };

        let Some(cache) = &self.owner_cache else {
            return fetch().await;
        };

        let cell = {
            let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            cache
                .entry((record.owner_table.clone(), record.owner_record_id.clone()))
                .or_default()
                .clone()
        };
        cell.get_or_try_init(fetch).await.cloned()
    }

    /// Cancelled downloads always lose their file; failed ones unless partial files are kept
    async fn discard_partial(&self, path: &std::path::Path, error: &SnowError) {
        if self.keep_partial_files && !matches!(error, SnowError::Cancelled) {
            warn!("Keeping partial file {}", path.display());
            return;
        }
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Failed to remove partial file {}: {}", path.display(), e);
        }
    }
}
