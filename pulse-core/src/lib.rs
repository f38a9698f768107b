//! Pulse core library — domain types, tenant directory, errors.
//!
//! Public API surface:
//! - [`types`] — tenants, scopes, and record structs
//! - [`error`] — [`DirectoryError`]
//! - [`directory`] — [`TenantDirectory`] trait + file-backed impl

pub mod directory;
pub mod error;
pub mod types;

pub use directory::{FileTenantDirectory, TenantDirectory};
pub use error::DirectoryError;
pub use types::{DailyRecord, Scope, ScopeKind, SeatRecord, Tenant};
