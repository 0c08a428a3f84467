//! Deduplicating, append-only result store backed by a JSON file.
//!
//! The store owns one file holding a JSON array of [`SearchResult`]s. Each
//! record is keyed by its canonical URL (see [`crate::url_key`]); a URL that
//! is already present is never added again and the first-seen record wins.
//!
//! # Durability
//!
//! [`ResultStore::append`] runs load → merge → write while holding an
//! exclusive advisory lock on a sidecar `<file>.lock`, so concurrent
//! sessions (threads or processes) cannot lose each other's records. The
//! write goes to `<file>.tmp`, is fsynced, and is renamed over the target,
//! so readers only ever observe the previous or the next complete file.
//!
//! # Corruption
//!
//! A file that cannot be decoded is reported as
//! [`StoreError::StorageCorrupt`] by [`ResultStore::try_load`]. Everything
//! else treats it as an empty collection; `append` copies it aside to a
//! fresh `<file>.corrupt-<timestamp>` before replacing it, and refuses to
//! write when that copy cannot be made.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::{CandidateRecord, SearchResult};
use crate::url_key::canonical_key;

/// Outcome of one [`ResultStore::append`] call.
#[derive(Debug, Default)]
pub struct AppendReport {
    /// Records that were new and are now persisted.
    pub added: usize,
    /// Candidates discarded because their URL was already known.
    pub duplicates: usize,
    /// Candidates rejected as [`StoreError::InvalidRecord`].
    pub rejected: Vec<StoreError>,
    /// Size of the collection after the write.
    pub total: usize,
}

impl AppendReport {
    /// Wire form used by the HTTP and MCP surfaces and `--json` output.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "added": self.added,
            "duplicates": self.duplicates,
            "rejected": self.rejected.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            "total": self.total,
        })
    }
}

/// Suffixed names tried per timestamp before a backup gives up.
const BACKUP_ATTEMPTS: usize = 16;

/// Handle to a result store file. Cheap to clone; holds no open files.
#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted collection, surfacing corruption as an error.
    ///
    /// A missing or blank file is an empty collection. Array elements that
    /// cannot be decoded, or whose URL has no canonical key, are skipped
    /// with a warning; later duplicates of a key are dropped.
    pub fn try_load(&self) -> Result<Vec<SearchResult>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "result store does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(StoreError::corrupt(
                    &self.path,
                    format!("unreadable: {}", e),
                ))
            }
        };

        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Vec::new());
        }

        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::corrupt(&self.path, format!("invalid JSON: {}", e)))?;

        let items = match value {
            serde_json::Value::Array(items) => items,
            _ => {
                return Err(StoreError::corrupt(
                    &self.path,
                    "expected a JSON array of records",
                ))
            }
        };

        let mut seen = HashSet::with_capacity(items.len());
        let mut records = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let record: SearchResult = match serde_json::from_value(item) {
                Ok(r) => r,
                Err(e) => {
                    warn!(path = %self.path.display(), index = i, error = %e, "skipping undecodable stored record");
                    continue;
                }
            };
            match canonical_key(&record.url) {
                Ok(key) => {
                    if seen.insert(key) {
                        records.push(record);
                    } else {
                        warn!(path = %self.path.display(), url = %record.url, "dropping duplicate stored record");
                    }
                }
                Err(reason) => {
                    warn!(path = %self.path.display(), index = i, %reason, "skipping stored record");
                }
            }
        }

        Ok(records)
    }

    /// Read the persisted collection, treating a corrupt file as empty.
    pub fn load(&self) -> Vec<SearchResult> {
        match self.try_load() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "treating result store as empty");
                Vec::new()
            }
        }
    }

    /// The full deduplicated collection in insertion order.
    pub fn list_all(&self) -> Vec<SearchResult> {
        self.load()
    }

    /// Merge a batch of candidates into the store and persist it.
    ///
    /// Invalid candidates are collected in [`AppendReport::rejected`] and do
    /// not abort the batch. Exactly one write happens per call, even when
    /// nothing new was added.
    ///
    /// # Errors
    ///
    /// [`StoreError::StorageWrite`] when the lock or the file cannot be
    /// written, or when a corrupt file cannot be backed up first. No retry
    /// is attempted.
    pub fn append(&self, batch: Vec<CandidateRecord>) -> Result<AppendReport, StoreError> {
        self.append_at(batch, Utc::now())
    }

    fn append_at(
        &self,
        batch: Vec<CandidateRecord>,
        now: DateTime<Utc>,
    ) -> Result<AppendReport, StoreError> {
        let _lock = StoreLock::acquire(&self.lock_path())?;

        let mut records = match self.try_load() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "replacing corrupt result store");
                self.back_up_corrupt(now)?;
                Vec::new()
            }
        };

        let mut seen: HashSet<String> = records
            .iter()
            .filter_map(|r| canonical_key(&r.url).ok())
            .collect();

        let mut report = AppendReport::default();

        for (index, candidate) in batch.into_iter().enumerate() {
            let url = candidate.url.as_deref().unwrap_or_default();
            let key = match canonical_key(url) {
                Ok(key) => key,
                Err(reason) => {
                    warn!(index, %reason, "rejecting search result");
                    report
                        .rejected
                        .push(StoreError::InvalidRecord { index, reason });
                    continue;
                }
            };

            if !seen.insert(key) {
                debug!(url, "already stored");
                report.duplicates += 1;
                continue;
            }

            records.push(into_result(candidate, now));
            report.added += 1;
        }

        self.persist(&records)?;
        report.total = records.len();

        info!(
            added = report.added,
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            total = report.total,
            path = %self.path.display(),
            "result store updated"
        );

        Ok(report)
    }

    /// Write the whole collection atomically (write, fsync, rename).
    fn persist(&self, records: &[SearchResult]) -> Result<(), StoreError> {
        ensure_parent(&self.path)?;

        let mut body = serde_json::to_vec_pretty(records)
            .map_err(|e| StoreError::write(&self.path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        body.push(b'\n');

        let temp_path = self.sidecar(".tmp");
        let written = write_synced(&temp_path, &body).and_then(|_| fs::rename(&temp_path, &self.path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::write(&self.path, e));
        }

        #[cfg(unix)]
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)
                .and_then(|dir| dir.sync_all())
                .map_err(|e| StoreError::write(parent, e))?;
        }

        Ok(())
    }

    /// Copy the current file to an unused `<file>.corrupt-<timestamp>[-n]`.
    fn back_up_corrupt(&self, now: DateTime<Utc>) -> Result<PathBuf, StoreError> {
        let body = fs::read(&self.path).map_err(|e| StoreError::write(&self.path, e))?;
        let stamp = now.format("%Y%m%dT%H%M%S%.3f");

        for attempt in 0..BACKUP_ATTEMPTS {
            let suffix = match attempt {
                0 => format!(".corrupt-{}", stamp),
                n => format!(".corrupt-{}-{}", stamp, n),
            };
            let backup = self.sidecar(&suffix);
            let file = match OpenOptions::new().write(true).create_new(true).open(&backup) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StoreError::write(&backup, e)),
            };
            if let Err(e) = fill_synced(file, &body) {
                let _ = fs::remove_file(&backup);
                return Err(StoreError::write(&backup, e));
            }
            info!(backup = %backup.display(), "kept a copy of the corrupt result store");
            return Ok(backup);
        }

        Err(StoreError::write(
            self.sidecar(&format!(".corrupt-{}", stamp)),
            io::Error::new(io::ErrorKind::AlreadyExists, "no free backup name"),
        ))
    }

    fn lock_path(&self) -> PathBuf {
        self.sidecar(".lock")
    }

    /// `<file><suffix>` next to the store file.
    fn sidecar(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("results.json"));
        name.push(suffix);
        self.path.with_file_name(name)
    }
}

fn into_result(candidate: CandidateRecord, now: chrono::DateTime<Utc>) -> SearchResult {
    let url = candidate.url.unwrap_or_default().trim().to_string();
    let title = non_blank(candidate.title).unwrap_or_else(|| url.clone());
    SearchResult {
        url,
        title,
        snippet: non_blank(candidate.snippet),
        enriched_text: non_blank(candidate.enriched_text),
        query: non_blank(candidate.query),
        retrieved_at: now,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| StoreError::write(parent, e)),
        None => Ok(()),
    }
}

fn write_synced(path: &Path, body: &[u8]) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    fill_synced(file, body)
}

fn fill_synced(mut file: File, body: &[u8]) -> io::Result<()> {
    file.write_all(body)?;
    file.sync_all()
}

/// Exclusive advisory lock held for one read-merge-write cycle.
struct StoreLock {
    file: File,
}

impl StoreLock {
    fn acquire(path: &Path) -> Result<Self, StoreError> {
        ensure_parent(path)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::write(path, e))?;
        fs2::FileExt::lock_exclusive(&file).map_err(|e| StoreError::write(path, e))?;
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
