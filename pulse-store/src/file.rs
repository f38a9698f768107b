//! File backend — flat-file journal, one directory per scope owner.
//!
//! # Storage layout
//!
//! ```text
//! <data_root>/
//!   <kind>_<name>/                          (per-tenant directory)
//!     <stem>_usage.json                     (cumulative reconciled series)
//!     <stem>_seats.json                     (cumulative roster)
//!     <stem>_latest_seats.json              (copy of the latest raw roster fetch)
//!     <stem>_<YYYYMMDD_HHMM>_<nn>_usage.json  (per-sync snapshot, never overwritten)
//!     <stem>_<YYYYMMDD_HHMM>_<nn>_seats.json
//! ```
//!
//! `<stem>` is the team slug for team scopes, `<kind>_<name>` for the
//! tenant aggregate. Cumulative files are replaced with the same atomic
//! `.tmp` + rename protocol used everywhere in this workspace; snapshot
//! files are write-once.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use pulse_core::types::{DailyRecord, Scope, SeatRecord};

use crate::backend::{page_slice, SeriesQuery, StorageBackend, DEFAULT_PAGE_SIZE};
use crate::error::{corrupt_err, io_err, StoreError};

/// Flat-file [`StorageBackend`] rooted at a data directory.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    /// Disambiguates snapshot files created within the same minute.
    snapshot_seq: AtomicU64,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            snapshot_seq: AtomicU64::new(0),
        }
    }

    /// `<root>/<kind>_<name>/` — pure, no I/O.
    pub fn scope_dir(&self, scope: &Scope) -> PathBuf {
        self.root.join(scope.dir_name())
    }

    fn series_path(&self, scope: &Scope) -> PathBuf {
        self.scope_dir(scope)
            .join(format!("{}_usage.json", scope.file_stem()))
    }

    fn roster_path(&self, scope: &Scope) -> PathBuf {
        self.scope_dir(scope)
            .join(format!("{}_seats.json", scope.file_stem()))
    }

    fn latest_roster_path(&self, scope: &Scope) -> PathBuf {
        self.scope_dir(scope)
            .join(format!("{}_latest_seats.json", scope.file_stem()))
    }

    /// Next free snapshot path for this scope and record family.
    /// `<stem>_<YYYYMMDD_HHMM>_<nn>_<family>.json`, bumping the sequence
    /// until the name is unused so snapshots are never overwritten. When
    /// every two-digit sequence for the minute is taken, names widen to a
    /// seconds stamp plus the raw counter, which only grows.
    fn snapshot_path(&self, scope: &Scope, family: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M").to_string();
        for _ in 0..100 {
            let seq = self.snapshot_seq.fetch_add(1, Ordering::Relaxed) % 100;
            let path = self.scope_dir(scope).join(format!(
                "{}_{}_{:02}_{}.json",
                scope.file_stem(),
                stamp,
                seq,
                family
            ));
            if !path.exists() {
                return path;
            }
        }

        loop {
            let seq = self.snapshot_seq.fetch_add(1, Ordering::Relaxed);
            let path = self.scope_dir(scope).join(format!(
                "{}_{}_{}_{}.json",
                scope.file_stem(),
                Utc::now().format("%Y%m%d_%H%M%S"),
                seq,
                family
            ));
            // The counter is strictly increasing, so this passes any finite
            // set of existing files.
            if !path.exists() {
                return path;
            }
        }
    }

    fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        serde_json::from_str(&contents).map_err(|e| corrupt_err(path, e))
    }

    /// Atomic replace: write `<path>.tmp`, then rename over the target.
    fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<(), StoreError> {
        let Some(dir) = path.parent() else {
            return Err(io_err(path, std::io::Error::other("path has no parent")));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let json = serde_json::to_string_pretty(records)?;
        let tmp = PathBuf::from(format!("{}.tmp", path.display()));
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(path, e));
        }
        Ok(())
    }

    /// Write-once snapshot; no tmp dance, the name is unique per sync.
    fn write_snapshot<T: Serialize>(&self, path: &Path, records: &[T]) -> Result<(), StoreError> {
        let Some(dir) = path.parent() else {
            return Err(io_err(path, std::io::Error::other("path has no parent")));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(path, &json).map_err(|e| io_err(path, e))?;
        tracing::debug!(snapshot = %path.display(), "raw fetch snapshot written");
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn initialize(&self, scope: &Scope) -> Result<(), StoreError> {
        let dir = self.scope_dir(scope);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(())
    }

    async fn load_series(&self, scope: &Scope) -> Result<Vec<DailyRecord>, StoreError> {
        let mut records: Vec<DailyRecord> = Self::read_records(&self.series_path(scope))?;
        records.sort_by_key(|r| r.date);
        Ok(records)
    }

    async fn load_roster(&self, scope: &Scope) -> Result<Vec<SeatRecord>, StoreError> {
        Self::read_records(&self.roster_path(scope))
    }

    async fn persist_series(
        &self,
        scope: &Scope,
        records: &[DailyRecord],
    ) -> Result<(), StoreError> {
        Self::write_records(&self.series_path(scope), records)
    }

    async fn persist_roster(
        &self,
        scope: &Scope,
        records: &[SeatRecord],
    ) -> Result<(), StoreError> {
        Self::write_records(&self.roster_path(scope), records)
    }

    async fn snapshot_series(
        &self,
        scope: &Scope,
        records: &[DailyRecord],
    ) -> Result<(), StoreError> {
        self.write_snapshot(&self.snapshot_path(scope, "usage"), records)
    }

    async fn snapshot_roster(
        &self,
        scope: &Scope,
        records: &[SeatRecord],
    ) -> Result<(), StoreError> {
        self.write_snapshot(&self.snapshot_path(scope, "seats"), records)?;
        // The latest raw fetch is also kept under a stable name for quick
        // manual inspection; unlike the timestamped copies it is replaced
        // on every sync.
        Self::write_records(&self.latest_roster_path(scope), records)
    }

    async fn query_series(
        &self,
        scope: &Scope,
        query: &SeriesQuery,
    ) -> Result<Vec<DailyRecord>, StoreError> {
        Ok(query.apply(self.load_series(scope).await?))
    }

    async fn query_roster(
        &self,
        scope: &Scope,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<Vec<SeatRecord>, StoreError> {
        let mut seats = self.load_roster(scope).await?;
        seats.sort_by(|a, b| {
            a.login
                .cmp(&b.login)
                .then(a.last_activity_at.cmp(&b.last_activity_at))
        });
        Ok(page_slice(
            seats,
            page.unwrap_or(1),
            page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        ))
    }
}
