use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use siasync_core::{RemoteFileRecord, RemoteStore};
use siasync_integrations::Emblem;
use thiserror::Error;

use super::emblems::{EmblemSender, EmblemTask};
use super::paths::{logical_path_for, metadata_path_for};
use super::walker::{LocalFileEntry, WalkError, WalkOutcome, walk_level};

pub const DEFAULT_REMOTE_PREFIX: &str = "Sia";
pub const DEFAULT_PATH_JOINER: &str = "/";
pub const DEFAULT_FILE_SYNC_LIMIT: usize = 20;
pub const DEFAULT_SYNC_RECURSION_LIMIT: usize = 4;
pub const DEFAULT_MAX_QUEUED_FILES: usize = 10;
pub const DEFAULT_DURATION_BLOCKS: u64 = 12960;
pub const DEFAULT_URGENT_THRESHOLD_BLOCKS: u64 = 300;
pub const DEFAULT_STALL_BLOCKS_PER_GB: u64 = 144;

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("walk error: {0}")]
    Walk(#[from] WalkError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub remote_prefix: String,
    pub path_joiner: String,
    pub file_sync_limit: usize,
    pub sync_recursion_limit: usize,
    pub max_queued_files: usize,
    pub default_duration_blocks: u64,
    pub renew: bool,
    /// Zero disables the urgent emblem.
    pub urgent_threshold_blocks: u64,
    pub stall_blocks_per_gb: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_prefix: DEFAULT_REMOTE_PREFIX.to_string(),
            path_joiner: DEFAULT_PATH_JOINER.to_string(),
            file_sync_limit: DEFAULT_FILE_SYNC_LIMIT,
            sync_recursion_limit: DEFAULT_SYNC_RECURSION_LIMIT,
            max_queued_files: DEFAULT_MAX_QUEUED_FILES,
            default_duration_blocks: DEFAULT_DURATION_BLOCKS,
            renew: true,
            urgent_threshold_blocks: DEFAULT_URGENT_THRESHOLD_BLOCKS,
            stall_blocks_per_gb: DEFAULT_STALL_BLOCKS_PER_GB,
        }
    }
}

/// Process-wide state sampled once per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncContext {
    pub unlocked: bool,
    pub paused: bool,
    pub current_height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    Skip,
    UploadNew,
    /// The remote copy is stale: save its metadata, withdraw it, and let the
    /// next cycle upload the new content.
    UploadAfterInvalidate,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileVerdict {
    pub decision: SyncDecision,
    pub emblem: Option<Emblem>,
    pub stalled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub files_started: usize,
    /// Upload requests issued, accepted or not. Counts against the cap.
    pub uploads_attempted: usize,
    pub invalidated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub emblems_queued: usize,
    pub recursion_limit_hit: bool,
    pub throttled: bool,
}

pub fn decide(
    local: &LocalFileEntry,
    record: Option<&RemoteFileRecord>,
    current_height: u64,
    config: &SyncConfig,
) -> FileVerdict {
    if local.is_hidden {
        return FileVerdict {
            decision: SyncDecision::Skip,
            emblem: None,
            stalled: false,
        };
    }
    let Some(record) = record else {
        let decision = if local.size_bytes == 0 {
            SyncDecision::Skip
        } else {
            SyncDecision::UploadNew
        };
        return FileVerdict {
            decision,
            emblem: None,
            stalled: false,
        };
    };

    let remaining = record.remaining_blocks(current_height);
    let primary = if local.size_bytes != record.size_bytes {
        if local.size_bytes == 0 {
            SyncDecision::Skip
        } else {
            SyncDecision::UploadAfterInvalidate
        }
    } else if remaining > 0 || !record.is_complete() {
        SyncDecision::Skip
    } else {
        SyncDecision::Delete
    };

    let stalled = is_stalled(record, remaining, config);
    FileVerdict {
        decision: if stalled { SyncDecision::Delete } else { primary },
        emblem: Some(emblem_for(record, remaining, config)),
        stalled,
    }
}

/// An upload that never became available within `ceil(size in GB)` times
/// the per-GB block budget. The budget is an empirical tunable.
pub fn is_stalled(record: &RemoteFileRecord, remaining: i64, config: &SyncConfig) -> bool {
    if record.available || record.expiration_block == 0 {
        return false;
    }
    let duration = i64::try_from(config.default_duration_blocks).unwrap_or(i64::MAX);
    let elapsed = duration.saturating_sub(remaining);
    let threshold = record
        .size_bytes
        .div_ceil(BYTES_PER_GB)
        .saturating_mul(config.stall_blocks_per_gb);
    elapsed > i64::try_from(threshold).unwrap_or(i64::MAX)
}

pub fn emblem_for(record: &RemoteFileRecord, remaining: i64, config: &SyncConfig) -> Emblem {
    // Later checks override earlier ones.
    let mut emblem = Emblem::InProgress;
    if record.available {
        emblem = Emblem::Default;
    }
    if record.is_complete() {
        emblem = Emblem::Complete;
    }
    let urgent = i64::try_from(config.urgent_threshold_blocks).unwrap_or(i64::MAX);
    if remaining > 0 && remaining < urgent {
        emblem = Emblem::Urgent;
    }
    emblem
}

pub struct ReconciliationEngine<R> {
    remote: R,
    config: SyncConfig,
    emblems: Option<EmblemSender>,
}

impl<R: RemoteStore> ReconciliationEngine<R> {
    pub fn new(remote: R, config: SyncConfig) -> Self {
        Self {
            remote,
            config,
            emblems: None,
        }
    }

    pub fn with_emblems(mut self, emblems: EmblemSender) -> Self {
        self.emblems = Some(emblems);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub async fn run_cycle(
        &self,
        local_root: &Path,
        listing: &[RemoteFileRecord],
        ctx: &SyncContext,
    ) -> Result<CycleReport, EngineError> {
        if !ctx.unlocked {
            tracing::debug!("wallet is locked, skipping sync cycle");
            return Ok(CycleReport::default());
        }
        if ctx.paused {
            tracing::debug!("sync is paused, skipping sync cycle");
            return Ok(CycleReport::default());
        }

        let queued = listing.iter().filter(|record| !record.is_complete()).count();
        if queued >= self.config.max_queued_files {
            tracing::info!(
                queued,
                limit = self.config.max_queued_files,
                "too many incomplete uploads, skipping sync cycle"
            );
            return Ok(CycleReport {
                throttled: true,
                ..CycleReport::default()
            });
        }

        let remote_by_path: HashMap<&str, &RemoteFileRecord> = listing
            .iter()
            .map(|record| (record.path.as_str(), record))
            .collect();
        let limit = self.config.sync_recursion_limit;
        let mut report = CycleReport::default();
        let mut pending: Vec<(PathBuf, usize)> = vec![(local_root.to_path_buf(), 1)];

        while let Some((dir, depth)) = pending.pop() {
            if self.budget_spent(&report) {
                break;
            }
            let level = match walk_level(local_root, &dir, depth, limit).await {
                Ok(WalkOutcome::Listed(level)) => level,
                Ok(WalkOutcome::DepthExceeded) => {
                    report.recursion_limit_hit = true;
                    continue;
                }
                Ok(WalkOutcome::PermissionDenied) => {
                    tracing::warn!(path = %dir.display(), "permission denied, skipping directory");
                    report.failed += 1;
                    continue;
                }
                Err(err) if depth == 1 => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(path = %dir.display(), error = %err, "failed to list directory");
                    report.failed += 1;
                    continue;
                }
            };

            for entry in &level.files {
                if self.budget_spent(&report) {
                    break;
                }
                self.reconcile_file(entry, &remote_by_path, ctx.current_height, &mut report)
                    .await;
            }
            // Reverse so the first subdirectory is popped next.
            for sub in level.dirs.into_iter().rev() {
                pending.push((sub.absolute_path, depth + 1));
            }
        }

        if report.recursion_limit_hit {
            tracing::warn!(limit, "reached directory recursion limit");
        }
        Ok(report)
    }

    fn budget_spent(&self, report: &CycleReport) -> bool {
        report.uploads_attempted >= self.config.file_sync_limit
    }

    async fn reconcile_file(
        &self,
        entry: &LocalFileEntry,
        remote_by_path: &HashMap<&str, &RemoteFileRecord>,
        current_height: u64,
        report: &mut CycleReport,
    ) {
        let logical = match logical_path_for(
            &self.config.remote_prefix,
            &self.config.path_joiner,
            &entry.relative_path,
        ) {
            Ok(logical) => logical,
            Err(err) => {
                tracing::warn!(path = %entry.absolute_path.display(), error = %err, "cannot map file to a logical path");
                report.failed += 1;
                return;
            }
        };
        let record = remote_by_path.get(logical.as_str()).copied();
        let verdict = decide(entry, record, current_height, &self.config);

        if let Some(emblem) = verdict.emblem {
            self.enqueue_emblem(&entry.absolute_path, emblem, report);
        }

        match verdict.decision {
            SyncDecision::Skip => {
                if record.is_none() {
                    tracing::debug!(path = %logical, "not uploading empty file");
                }
                report.skipped += 1;
            }
            SyncDecision::UploadNew => {
                report.uploads_attempted += 1;
                match self
                    .remote
                    .upload(
                        &logical,
                        &entry.absolute_path,
                        self.config.default_duration_blocks,
                        self.config.renew,
                    )
                    .await
                {
                    Ok(()) => {
                        tracing::info!(path = %logical, size = entry.size_bytes, "upload started");
                        report.files_started += 1;
                    }
                    Err(err) => {
                        tracing::warn!(path = %logical, error = %err, "upload failed");
                        report.failed += 1;
                    }
                }
            }
            SyncDecision::UploadAfterInvalidate => {
                self.invalidate(entry, &logical, report).await;
            }
            SyncDecision::Delete => match self.remote.delete(&logical).await {
                Ok(()) => {
                    tracing::info!(path = %logical, stalled = verdict.stalled, "removed remote copy");
                    report.deleted += 1;
                }
                Err(err) => {
                    tracing::warn!(path = %logical, error = %err, "delete failed");
                    report.failed += 1;
                }
            },
        }
    }

    async fn invalidate(&self, entry: &LocalFileEntry, logical: &str, report: &mut CycleReport) {
        let destination = match metadata_path_for(&entry.absolute_path) {
            Ok(destination) => destination,
            Err(err) => {
                tracing::warn!(path = %logical, error = %err, "cannot place recovery metadata");
                report.failed += 1;
                return;
            }
        };
        // Keep the old copy recoverable before withdrawing it.
        if let Err(err) = self.remote.download_metadata(logical, &destination).await {
            tracing::warn!(path = %logical, error = %err, "failed to save recovery metadata");
            report.failed += 1;
            return;
        }
        if let Err(err) = self.remote.delete(logical).await {
            tracing::warn!(path = %logical, error = %err, "failed to withdraw stale remote copy");
            report.failed += 1;
            return;
        }
        tracing::info!(
            path = %logical,
            metadata = %destination.display(),
            "local file changed, withdrew remote copy"
        );
        report.invalidated += 1;
    }

    fn enqueue_emblem(&self, path: &Path, emblem: Emblem, report: &mut CycleReport) {
        let Some(tx) = &self.emblems else {
            return;
        };
        let task = EmblemTask {
            path: path.to_path_buf(),
            emblem,
        };
        if tx.send(task).is_ok() {
            report.emblems_queued += 1;
        } else {
            tracing::debug!(path = %path.display(), "emblem applier is gone, dropping emblem");
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
