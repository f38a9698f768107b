//! Reconciliation — pure merge-by-key over fetched vs. stored records.
//!
//! The algorithm never deletes: a record present in the stored series but
//! absent from the fetch is retained untouched. A fetched record whose key
//! matches a stored one replaces it *in place* (position preserved) when
//! its content differs; an identical record is not an update, so merging
//! an already-stored fetch reports no changes and callers skip the
//! persist. A fetched record with a new key is appended. An empty fetch
//! short-circuits to the stored series unchanged.
//!
//! Keys: calendar date for daily records, `(seat id, last_activity_at)`
//! for roster entries — a new activity timestamp for a known seat is an
//! append, not a replace.

use chrono::{DateTime, NaiveDate, Utc};

use pulse_core::types::{DailyRecord, SeatRecord};

/// Result of one merge: the next series plus the keys that changed.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<T, K> {
    pub merged: Vec<T>,
    pub added: Vec<K>,
    pub updated: Vec<K>,
}

impl<T, K> MergeOutcome<T, K> {
    /// True when a persist is warranted.
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.updated.is_empty()
    }
}

/// Merge `incoming` into `existing`, keyed by `key_fn`.
///
/// Each incoming record is independently keyed, so a partial batch (fetch
/// aborted mid-stream) degrades to a partial merge rather than an
/// all-or-nothing failure.
pub fn merge<T, K, F>(existing: &[T], incoming: &[T], key_fn: F) -> MergeOutcome<T, K>
where
    T: Clone + PartialEq,
    K: PartialEq + Clone,
    F: Fn(&T) -> K,
{
    let mut merged: Vec<T> = existing.to_vec();
    let mut added = Vec::new();
    let mut updated = Vec::new();

    for record in incoming {
        let key = key_fn(record);
        match merged.iter().position(|r| key_fn(r) == key) {
            Some(index) => {
                // Identical content is not an update; re-fetching stored
                // data must not trigger a rewrite.
                if merged[index] != *record {
                    merged[index] = record.clone();
                    updated.push(key);
                }
            }
            None => {
                merged.push(record.clone());
                added.push(key);
            }
        }
    }

    MergeOutcome {
        merged,
        added,
        updated,
    }
}

/// Identity of a daily record within its scope.
pub fn daily_key(record: &DailyRecord) -> NaiveDate {
    record.date
}

/// Identity of a roster entry within its scope.
pub fn seat_key(seat: &SeatRecord) -> (i64, Option<DateTime<Utc>>) {
    (seat.id, seat.last_activity_at)
}
