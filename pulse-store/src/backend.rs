//! The [`StorageBackend`] contract — uniform persistence operations over
//! per-scope series and rosters, implemented by the file and relational
//! variants.
//!
//! Backends are the sole mutators of persisted state. The reconciler only
//! computes the next series; the orchestrator injects one backend at
//! startup and never branches on the variant.

use async_trait::async_trait;
use chrono::NaiveDate;

use pulse_core::types::{DailyRecord, Scope, SeatRecord};

use crate::error::StoreError;

/// Default query page size, matching the upstream 28-day metrics window.
pub const DEFAULT_PAGE_SIZE: usize = 28;

/// Date-range + pagination parameters for series queries.
///
/// Boundary dates are inclusive; `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesQuery {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub page: usize,
    pub page_size: usize,
}

impl Default for SeriesQuery {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SeriesQuery {
    pub fn range(since: Option<NaiveDate>, until: Option<NaiveDate>) -> Self {
        Self {
            since,
            until,
            ..Self::default()
        }
    }

    /// Offset of the first record on this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1) * self.page_size
    }

    /// Filter by the inclusive date range, then slice out the page.
    /// `records` must already be sorted by date ascending.
    pub(crate) fn apply(&self, records: Vec<DailyRecord>) -> Vec<DailyRecord> {
        records
            .into_iter()
            .filter(|r| self.since.map_or(true, |since| r.date >= since))
            .filter(|r| self.until.map_or(true, |until| r.date <= until))
            .skip(self.offset())
            .take(self.page_size)
            .collect()
    }
}

/// Slice a page out of an already-sorted roster.
pub(crate) fn page_slice(seats: Vec<SeatRecord>, page: usize, page_size: usize) -> Vec<SeatRecord> {
    seats
        .into_iter()
        .skip(page.saturating_sub(1) * page_size)
        .take(page_size)
        .collect()
}

/// Uniform persistence operations for one scope's series and roster.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Idempotently provision the storage location for a scope
    /// (directory or tables). Safe to call repeatedly and concurrently.
    async fn initialize(&self, scope: &Scope) -> Result<(), StoreError>;

    /// The full persisted series, ordered by date ascending. Empty when
    /// nothing is persisted yet; `Corrupt` when unreadable.
    async fn load_series(&self, scope: &Scope) -> Result<Vec<DailyRecord>, StoreError>;

    /// The full persisted roster.
    async fn load_roster(&self, scope: &Scope) -> Result<Vec<SeatRecord>, StoreError>;

    /// Atomically replace the persisted series for this scope.
    async fn persist_series(&self, scope: &Scope, records: &[DailyRecord])
        -> Result<(), StoreError>;

    /// Atomically replace the persisted roster for this scope.
    async fn persist_roster(&self, scope: &Scope, records: &[SeatRecord])
        -> Result<(), StoreError>;

    /// Record an immutable timestamped copy of a raw series fetch — the
    /// audit trail. One record per sync, never overwritten.
    async fn snapshot_series(
        &self,
        scope: &Scope,
        records: &[DailyRecord],
    ) -> Result<(), StoreError>;

    /// Roster counterpart of [`snapshot_series`](Self::snapshot_series).
    async fn snapshot_roster(
        &self,
        scope: &Scope,
        records: &[SeatRecord],
    ) -> Result<(), StoreError>;

    /// Date-filtered, paged view of the persisted series.
    async fn query_series(
        &self,
        scope: &Scope,
        query: &SeriesQuery,
    ) -> Result<Vec<DailyRecord>, StoreError>;

    /// Paged view of the persisted roster, sorted by
    /// `(login, last_activity_at)`. `page` is 1-based; defaults are
    /// page 1 and [`DEFAULT_PAGE_SIZE`].
    async fn query_roster(
        &self,
        scope: &Scope,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<Vec<SeatRecord>, StoreError>;
}
