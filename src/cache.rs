//! File-backed cache for coverage trail responses.
//!
//! Entries are JSON files keyed by a hash of the (since, until) window.
//! Only windows whose `until` lies before the start of the current UTC day
//! are cached: such data is immutable and safe to memoize. Eviction is
//! LRU-approximate by file modification time under a byte budget.
//!
//! Every operation here is advisory. Any I/O or decode error degrades to a
//! cache miss or a skipped write; callers never see cache failures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::CacheConfig;
use crate::models::Trail;

pub struct CoverageCache {
    dir: PathBuf,
    max_bytes: u64,
}

impl CoverageCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            dir: PathBuf::from(&config.dir),
            max_bytes: config.max_bytes,
        }
    }

    /// Return cached trails, or None on a miss (including any I/O error).
    pub fn get(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Option<Vec<Trail>> {
        if !is_cacheable(until, Utc::now()) {
            return None;
        }
        let path = self.entry_path(since, until);
        let content = fs::read(&path).ok()?;
        let trails = serde_json::from_slice(&content).ok()?;

        // Refresh the access marker so eviction sees this entry as recent
        if let Ok(file) = fs::File::open(&path) {
            let _ = file.set_modified(SystemTime::now());
        }
        debug!(entry = %path.display(), "cache hit");
        Some(trails)
    }

    /// Store trails if the window is cacheable. Errors are swallowed.
    pub fn put(&self, since: DateTime<Utc>, until: DateTime<Utc>, trails: &[Trail]) {
        if !is_cacheable(until, Utc::now()) {
            return;
        }
        if fs::create_dir_all(&self.dir).is_err() {
            return;
        }
        self.evict_if_needed();

        let path = self.entry_path(since, until);
        let body = match serde_json::to_vec(trails) {
            Ok(b) => b,
            Err(_) => return,
        };

        // Write-then-rename so a concurrent reader never sees a torn entry
        let tmp = path.with_extension("tmp");
        if fs::write(&tmp, &body).is_ok() && fs::rename(&tmp, &path).is_ok() {
            debug!(entry = %path.display(), trails = trails.len(), "cache put");
        } else {
            let _ = fs::remove_file(&tmp);
        }
    }

    fn entry_path(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}.json", cache_key(since, until)))
    }

    /// Delete least-recently-accessed entries until total size fits the
    /// budget. Concurrent writers may race here; over- or under-evicting
    /// slightly is acceptable, corruption is not (deletes are whole-file).
    fn evict_if_needed(&self) {
        let mut entries = match read_entries(&self.dir) {
            Ok(e) => e,
            Err(_) => return,
        };
        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        if total <= self.max_bytes {
            return;
        }

        entries.sort_by_key(|e| e.modified);
        for entry in entries {
            if total <= self.max_bytes {
                break;
            }
            if fs::remove_file(&entry.path).is_ok() {
                debug!(entry = %entry.path.display(), size = entry.size, "cache evict");
                total = total.saturating_sub(entry.size);
            }
        }
    }
}

struct CacheEntry {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

fn read_entries(dir: &Path) -> std::io::Result<Vec<CacheEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let meta = entry.metadata()?;
        entries.push(CacheEntry {
            path,
            size: meta.len(),
            modified: meta.modified()?,
        });
    }
    Ok(entries)
}

/// Fixed-length key derived from the canonical textual form of the bounds
fn cache_key(since: DateTime<Utc>, until: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(since.to_rfc3339().as_bytes());
    hasher.update(b"|");
    hasher.update(until.to_rfc3339().as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// A window is cacheable only when it is fully historical: `until` strictly
/// before the start of the current UTC day means the data can never change.
fn is_cacheable(until: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let today_start = now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();
    until < today_start
}
