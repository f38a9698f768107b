//! Domain types for the Pulse sync engine.
//!
//! A [`Tenant`] is a registered credential for an organization or
//! enterprise scope. A [`Scope`] is one resolved unit of synchronization:
//! the tenant itself, or one of its child teams. [`DailyRecord`] and
//! [`SeatRecord`] are the two record families reconciled per scope.
//!
//! All types are serializable via serde + serde_json; persisted files use
//! the same field names as the upstream API payloads.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Scope kind
// ---------------------------------------------------------------------------

/// The kind of top-level scope a tenant is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Organization,
    Enterprise,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKind::Organization => write!(f, "organization"),
            ScopeKind::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl ScopeKind {
    /// Parse the lowercase wire form (`"organization"` / `"enterprise"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "organization" => Some(ScopeKind::Organization),
            "enterprise" => Some(ScopeKind::Enterprise),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tenant
// ---------------------------------------------------------------------------

/// A registered tenant: scope identity plus the credential used to fetch
/// its snapshots.
///
/// Identity is `(scope_kind, scope_name, default_team)` compared
/// case-insensitively. The sync core never creates or deletes tenants; it
/// only filters by `active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub scope_kind: ScopeKind,
    pub scope_name: String,
    /// Opaque API credential. Never logged.
    pub credential: String,
    /// Empty string means the tenant covers the whole scope.
    #[serde(default)]
    pub default_team: String,
    pub active: bool,
}

impl Tenant {
    pub fn new(
        scope_kind: ScopeKind,
        scope_name: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            scope_kind,
            scope_name: scope_name.into(),
            credential: credential.into(),
            default_team: String::new(),
            active: true,
        }
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.default_team = team.into();
        self
    }

    /// Case-insensitive identity comparison on
    /// `(scope_kind, scope_name, default_team)`.
    pub fn same_identity(&self, other: &Tenant) -> bool {
        self.scope_kind == other.scope_kind
            && self.scope_name.eq_ignore_ascii_case(&other.scope_name)
            && self.default_team.eq_ignore_ascii_case(&other.default_team)
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// One resolved unit of synchronization: a tenant, or a tenant + team.
///
/// A scope exclusively owns its persisted series and roster; records are
/// never shared across scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub kind: ScopeKind,
    pub name: String,
    /// Team slug; empty string means the tenant-level aggregate.
    #[serde(default)]
    pub team: String,
    /// Credential inherited from the owning tenant.
    #[serde(skip_serializing, default)]
    pub credential: String,
}

impl Scope {
    /// The scope a tenant syncs in simple mode: its own default team
    /// (which may be empty, meaning the whole scope).
    pub fn of_tenant(tenant: &Tenant) -> Self {
        Self {
            kind: tenant.scope_kind,
            name: tenant.scope_name.clone(),
            team: tenant.default_team.clone(),
            credential: tenant.credential.clone(),
        }
    }

    /// The tenant-level aggregate scope (team = "").
    pub fn aggregate_of(tenant: &Tenant) -> Self {
        Self {
            team: String::new(),
            ..Self::of_tenant(tenant)
        }
    }

    /// A child-team scope discovered during fan-out.
    pub fn team_of(tenant: &Tenant, team_slug: impl Into<String>) -> Self {
        Self {
            team: team_slug.into(),
            ..Self::of_tenant(tenant)
        }
    }

    /// Directory name owning all of this scope's files: `<kind>_<name>`.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.kind, self.name)
    }

    /// File stem for cumulative/snapshot files: the team slug when this is
    /// a team scope, otherwise `<kind>_<name>`.
    pub fn file_stem(&self) -> String {
        if self.team.is_empty() {
            self.dir_name()
        } else {
            self.team.clone()
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.team.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}[{}]", self.kind, self.name, self.team)
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One calendar day's usage/metrics snapshot for a scope.
///
/// The nested usage payload is carried opaquely; `date` is the record's
/// identity within a scope. On the wire and on disk the date sits inline
/// in the payload object (`"date": "YYYY-MM-DD"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub payload: Value,
}

impl DailyRecord {
    pub fn new(date: NaiveDate, payload: Value) -> Self {
        Self { date, payload }
    }
}

/// One roster entry: a license assignment's activity state.
///
/// Identity for reconciliation is `(id, last_activity_at)` — a fetch with
/// a new activity timestamp for a known seat appends a historical entry
/// rather than replacing the prior one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatRecord {
    pub login: String,
    pub id: i64,
    #[serde(default)]
    pub team: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_activity_editor: Option<String>,
}
