//! # pulse-sync
//!
//! Tenant-scoped synchronization: the per-tenant orchestrator (simple vs
//! child-team fan-out) and the timed scheduler that walks the active
//! tenant set, isolating failures per tenant and per scope.

pub mod orchestrator;
pub mod scheduler;
pub mod source;

pub use orchestrator::{ScopeOrchestrator, ScopeOutcome, TenantReport};
pub use scheduler::{PassSummary, TenantScheduler};
pub use source::{SourceClient, SourceError, TeamInfo};
