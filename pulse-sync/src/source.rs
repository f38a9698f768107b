//! The [`SourceClient`] contract — the external billing/analytics API as
//! the sync engine consumes it.
//!
//! Implementations live at the composition root (the daemon ships an HTTP
//! client); the orchestrator only sees this trait. An empty result vec is
//! a valid success meaning "nothing new", never an error.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use pulse_core::types::{DailyRecord, Scope, SeatRecord};

/// A child team discovered under an organization scope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TeamInfo {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// Failures surfaced by a source client.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Non-2xx response or transport failure. Retryable next cycle; never
    /// retried within a cycle.
    #[error("source unavailable for {context}: {message}")]
    Unavailable { context: String, message: String },

    /// Credential or scope is malformed/rejected. Fatal for this tenant's
    /// sync only.
    #[error("invalid tenant for {context}: {message}")]
    InvalidTenant { context: String, message: String },
}

impl SourceError {
    pub fn unavailable(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn invalid_tenant(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTenant {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Fetch operations against the remote API for one scope.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Daily usage/metrics snapshots for the scope.
    async fn fetch_series(&self, scope: &Scope) -> Result<Vec<DailyRecord>, SourceError>;

    /// The current seat roster for the scope; the implementation handles
    /// its own pagination up to the remote page-size limit.
    async fn fetch_roster(&self, scope: &Scope) -> Result<Vec<SeatRecord>, SourceError>;

    /// Child teams under the scope (empty for scopes with no teams).
    async fn list_child_teams(&self, scope: &Scope) -> Result<Vec<TeamInfo>, SourceError>;
}
