//! # pulse-store
//!
//! Storage backends and the reconciliation algorithm.
//!
//! [`StorageBackend`] is the uniform contract over persisted per-scope
//! state, implemented by [`FileBackend`] (flat-file journal) and
//! [`RelationalBackend`] (SQLite via sqlx). [`reconcile::merge`] is the
//! pure merge-by-key algorithm both sync paths run before persisting.

pub mod backend;
pub mod error;
pub mod file;
pub mod reconcile;
pub mod sql;

pub use backend::{SeriesQuery, StorageBackend};
pub use error::StoreError;
pub use file::FileBackend;
pub use reconcile::MergeOutcome;
pub use sql::{RelationalBackend, SqlTenantDirectory};
