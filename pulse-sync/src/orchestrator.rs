//! Per-tenant orchestration: resolve a tenant into scopes, then run the
//! fetch → snapshot → merge → persist pipeline for each.
//!
//! Two modes, selected by a process-wide fan-out flag:
//! - **simple** — one scope, the tenant's own default team;
//! - **fan-out** — organization tenants with no designated team expand
//!   into one scope per child team plus the tenant aggregate, processed
//!   sequentially (external API rate limits), aggregate last so it
//!   reflects the freshest team totals.
//!
//! A failed scope is reported in its [`ScopeOutcome`] and never aborts the
//! remaining scopes.

use std::sync::Arc;

use thiserror::Error;

use pulse_core::types::{Scope, ScopeKind, Tenant};
use pulse_store::error::StoreError;
use pulse_store::reconcile;
use pulse_store::StorageBackend;

use crate::source::{SourceClient, SourceError};

/// Result of syncing one scope.
#[derive(Debug, Clone)]
pub struct ScopeOutcome {
    pub scope: Scope,
    pub series_added: usize,
    pub series_updated: usize,
    pub roster_added: usize,
    pub roster_updated: usize,
    /// Present when this scope's sync failed; the other scopes of the
    /// tenant are unaffected.
    pub error: Option<String>,
}

impl ScopeOutcome {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    fn success(scope: Scope, counts: ScopeCounts) -> Self {
        Self {
            scope,
            series_added: counts.series_added,
            series_updated: counts.series_updated,
            roster_added: counts.roster_added,
            roster_updated: counts.roster_updated,
            error: None,
        }
    }

    fn failure(scope: Scope, error: impl ToString) -> Self {
        Self {
            scope,
            series_added: 0,
            series_updated: 0,
            roster_added: 0,
            roster_updated: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Per-tenant sync report: one outcome per scope processed.
#[derive(Debug, Clone)]
pub struct TenantReport {
    pub tenant: String,
    pub outcomes: Vec<ScopeOutcome>,
}

impl TenantReport {
    /// True when every scope synced cleanly.
    pub fn ok(&self) -> bool {
        self.outcomes.iter().all(ScopeOutcome::ok)
    }

    pub fn failed_scopes(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.ok()).count()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ScopeCounts {
    series_added: usize,
    series_updated: usize,
    roster_added: usize,
    roster_updated: usize,
}

#[derive(Debug, Error)]
enum ScopeSyncError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives reconciliation and storage for all scopes of one tenant.
pub struct ScopeOrchestrator {
    source: Arc<dyn SourceClient>,
    backend: Arc<dyn StorageBackend>,
    fan_out: bool,
}

impl ScopeOrchestrator {
    pub fn new(
        source: Arc<dyn SourceClient>,
        backend: Arc<dyn StorageBackend>,
        fan_out: bool,
    ) -> Self {
        Self {
            source,
            backend,
            fan_out,
        }
    }

    /// Sync every scope the tenant resolves to. Partial failure is
    /// reported in the outcomes, never escalated to the caller.
    pub async fn sync_tenant(&self, tenant: &Tenant) -> TenantReport {
        // Fan-out only applies to organization-wide tenants; a tenant that
        // designates a team has nothing to fan out to.
        let fan_out = self.fan_out
            && tenant.scope_kind == ScopeKind::Organization
            && tenant.default_team.trim().is_empty();

        let outcomes = if fan_out {
            self.sync_fan_out(tenant).await
        } else {
            vec![self.sync_scope(Scope::of_tenant(tenant)).await]
        };

        TenantReport {
            tenant: format!("{}/{}", tenant.scope_kind, tenant.scope_name),
            outcomes,
        }
    }

    async fn sync_fan_out(&self, tenant: &Tenant) -> Vec<ScopeOutcome> {
        let aggregate = Scope::aggregate_of(tenant);
        let teams = match self.source.list_child_teams(&aggregate).await {
            Ok(teams) => teams,
            Err(err) => {
                tracing::error!(scope = %aggregate, error = %err, "listing child teams failed");
                return vec![ScopeOutcome::failure(aggregate, err)];
            }
        };

        let mut outcomes = Vec::with_capacity(teams.len() + 1);
        // Teams sync sequentially, in listed order, to stay under the
        // per-token rate limit.
        for team in &teams {
            outcomes.push(self.sync_scope(Scope::team_of(tenant, &team.slug)).await);
        }
        // The tenant aggregate runs last so it reflects the freshest totals.
        outcomes.push(self.sync_scope(aggregate).await);
        outcomes
    }

    /// Sync a single scope; the error boundary for that scope.
    pub async fn sync_scope(&self, scope: Scope) -> ScopeOutcome {
        match self.try_sync_scope(&scope).await {
            Ok(counts) => {
                tracing::info!(
                    scope = %scope,
                    series_added = counts.series_added,
                    series_updated = counts.series_updated,
                    roster_added = counts.roster_added,
                    roster_updated = counts.roster_updated,
                    "scope synced",
                );
                ScopeOutcome::success(scope, counts)
            }
            Err(err) => {
                tracing::warn!(scope = %scope, error = %err, "scope sync failed");
                ScopeOutcome::failure(scope, err)
            }
        }
    }

    async fn try_sync_scope(&self, scope: &Scope) -> Result<ScopeCounts, ScopeSyncError> {
        self.backend.initialize(scope).await?;
        let (series_added, series_updated) = self.sync_series(scope).await?;
        let (roster_added, roster_updated) = self.sync_roster(scope).await?;
        Ok(ScopeCounts {
            series_added,
            series_updated,
            roster_added,
            roster_updated,
        })
    }

    async fn sync_series(&self, scope: &Scope) -> Result<(usize, usize), ScopeSyncError> {
        let fetched = self.source.fetch_series(scope).await?;
        if fetched.is_empty() {
            tracing::warn!(scope = %scope, "source returned no series records; treating as no-op");
            return Ok((0, 0));
        }

        self.backend.snapshot_series(scope, &fetched).await?;

        let existing = self.load_degrading_corrupt(scope, self.backend.load_series(scope).await)?;
        let merge = reconcile::merge(&existing, &fetched, reconcile::daily_key);
        if merge.changed() {
            self.backend.persist_series(scope, &merge.merged).await?;
        }
        Ok((merge.added.len(), merge.updated.len()))
    }

    async fn sync_roster(&self, scope: &Scope) -> Result<(usize, usize), ScopeSyncError> {
        let fetched = self.source.fetch_roster(scope).await?;
        if fetched.is_empty() {
            tracing::warn!(scope = %scope, "source returned no roster entries; treating as no-op");
            return Ok((0, 0));
        }

        self.backend.snapshot_roster(scope, &fetched).await?;

        let existing = self.load_degrading_corrupt(scope, self.backend.load_roster(scope).await)?;
        let merge = reconcile::merge(&existing, &fetched, reconcile::seat_key);
        if merge.changed() {
            self.backend.persist_roster(scope, &merge.merged).await?;
        }
        Ok((merge.added.len(), merge.updated.len()))
    }

    /// Corrupt persisted content degrades to an empty series on read; the
    /// write is still attempted so the next persist repairs the store.
    fn load_degrading_corrupt<T>(
        &self,
        scope: &Scope,
        result: Result<Vec<T>, StoreError>,
    ) -> Result<Vec<T>, ScopeSyncError> {
        match result {
            Ok(records) => Ok(records),
            Err(err) if err.is_corrupt() => {
                tracing::warn!(scope = %scope, error = %err, "stored content corrupt; reading as empty");
                Ok(Vec::new())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use pulse_core::types::{DailyRecord, SeatRecord};
    use pulse_store::{FileBackend, SeriesQuery};
    use serde_json::json;
    use tempfile::TempDir;

    use crate::source::TeamInfo;

    fn record(date: &str, total: i64) -> DailyRecord {
        DailyRecord::new(date.parse().expect("date"), json!({ "total": total }))
    }

    fn seat(id: i64, activity: &str) -> SeatRecord {
        SeatRecord {
            login: format!("user-{id}"),
            id,
            team: String::new(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            last_activity_at: Some(activity.parse().expect("timestamp")),
            last_activity_editor: None,
        }
    }

    /// Scripted source: series/roster keyed by scope file stem, optional
    /// per-stem failures, call log for ordering assertions.
    #[derive(Default)]
    struct ScriptedSource {
        series: HashMap<String, Vec<DailyRecord>>,
        rosters: HashMap<String, Vec<SeatRecord>>,
        teams: Vec<TeamInfo>,
        fail_series: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn with_series(mut self, stem: &str, series: Vec<DailyRecord>) -> Self {
            self.series.insert(stem.to_string(), series);
            self
        }

        fn with_roster(mut self, stem: &str, roster: Vec<SeatRecord>) -> Self {
            self.rosters.insert(stem.to_string(), roster);
            self
        }

        fn with_teams(mut self, slugs: &[&str]) -> Self {
            self.teams = slugs
                .iter()
                .enumerate()
                .map(|(i, slug)| TeamInfo {
                    id: i as i64,
                    name: slug.to_string(),
                    slug: slug.to_string(),
                })
                .collect();
            self
        }

        fn failing_series(mut self, stem: &str) -> Self {
            self.fail_series.insert(stem.to_string());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl SourceClient for ScriptedSource {
        async fn fetch_series(&self, scope: &Scope) -> Result<Vec<DailyRecord>, SourceError> {
            let stem = scope.file_stem();
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("series:{stem}"));
            if self.fail_series.contains(&stem) {
                return Err(SourceError::unavailable(stem, "HTTP 502"));
            }
            Ok(self.series.get(&stem).cloned().unwrap_or_default())
        }

        async fn fetch_roster(&self, scope: &Scope) -> Result<Vec<SeatRecord>, SourceError> {
            Ok(self
                .rosters
                .get(&scope.file_stem())
                .cloned()
                .unwrap_or_default())
        }

        async fn list_child_teams(&self, _scope: &Scope) -> Result<Vec<TeamInfo>, SourceError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push("teams".to_string());
            Ok(self.teams.clone())
        }
    }

    fn org_tenant() -> Tenant {
        Tenant::new(ScopeKind::Organization, "acme", "token")
    }

    fn orchestrator(
        source: ScriptedSource,
        root: &TempDir,
        fan_out: bool,
    ) -> (ScopeOrchestrator, Arc<FileBackend>) {
        let backend = Arc::new(FileBackend::new(root.path()));
        let orchestrator = ScopeOrchestrator::new(Arc::new(source), backend.clone(), fan_out);
        (orchestrator, backend)
    }

    #[tokio::test]
    async fn simple_mode_merges_update_and_addition() {
        let root = TempDir::new().expect("tempdir");
        let tenant = org_tenant();
        let scope = Scope::of_tenant(&tenant);

        // Seed a stored series, then sync an overlapping fetch.
        let seed = FileBackend::new(root.path());
        seed.persist_series(&scope, &[record("2024-01-01", 5)])
            .await
            .expect("seed");

        let source = ScriptedSource::default().with_series(
            "organization_acme",
            vec![record("2024-01-01", 9), record("2024-01-02", 3)],
        );
        let (orchestrator, backend) = orchestrator(source, &root, false);

        let report = orchestrator.sync_tenant(&tenant).await;
        assert!(report.ok());
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].series_added, 1);
        assert_eq!(report.outcomes[0].series_updated, 1);

        let stored = backend.load_series(&scope).await.expect("load");
        assert_eq!(stored, vec![record("2024-01-01", 9), record("2024-01-02", 3)]);
    }

    #[tokio::test]
    async fn repeat_sync_of_unchanged_data_reports_no_changes() {
        let root = TempDir::new().expect("tempdir");
        let tenant = org_tenant();
        let source = ScriptedSource::default()
            .with_series("organization_acme", vec![record("2024-01-01", 5)])
            .with_roster("organization_acme", vec![seat(42, "2024-01-01T10:00:00Z")]);
        let (orchestrator, _backend) = orchestrator(source, &root, false);

        let first = orchestrator.sync_tenant(&tenant).await;
        assert_eq!(first.outcomes[0].series_added, 1);
        assert_eq!(first.outcomes[0].roster_added, 1);

        // The source returns exactly what is already stored; nothing to do.
        let second = orchestrator.sync_tenant(&tenant).await;
        assert!(second.ok());
        assert_eq!(second.outcomes[0].series_added, 0);
        assert_eq!(second.outcomes[0].series_updated, 0);
        assert_eq!(second.outcomes[0].roster_added, 0);
        assert_eq!(second.outcomes[0].roster_updated, 0);
    }

    #[tokio::test]
    async fn empty_fetch_is_a_noop_without_persist() {
        let root = TempDir::new().expect("tempdir");
        let tenant = org_tenant();
        let (orchestrator, backend) = orchestrator(ScriptedSource::default(), &root, false);

        let report = orchestrator.sync_tenant(&tenant).await;
        assert!(report.ok());

        let scope = Scope::of_tenant(&tenant);
        assert!(backend.load_series(&scope).await.expect("load").is_empty());
        // No snapshot either: nothing was fetched, nothing to audit.
        let entries: Vec<_> = std::fs::read_dir(backend.scope_dir(&scope))
            .expect("scope dir exists after initialize")
            .collect();
        assert!(entries.is_empty(), "no files written on empty fetch");
    }

    #[tokio::test]
    async fn fan_out_isolates_a_failing_team() {
        let root = TempDir::new().expect("tempdir");
        let tenant = org_tenant();
        let source = ScriptedSource::default()
            .with_teams(&["alpha", "beta", "gamma"])
            .with_series("alpha", vec![record("2024-01-01", 1)])
            .with_series("gamma", vec![record("2024-01-01", 3)])
            .with_series("organization_acme", vec![record("2024-01-01", 6)])
            .failing_series("beta");
        let (orchestrator, backend) = orchestrator(source, &root, true);

        let report = orchestrator.sync_tenant(&tenant).await;

        assert!(!report.ok());
        assert_eq!(report.outcomes.len(), 4, "three teams plus the aggregate");
        assert_eq!(report.failed_scopes(), 1);

        // Scopes around the failure were persisted with their own updates.
        let alpha = backend
            .load_series(&Scope::team_of(&tenant, "alpha"))
            .await
            .expect("alpha");
        let gamma = backend
            .load_series(&Scope::team_of(&tenant, "gamma"))
            .await
            .expect("gamma");
        let aggregate = backend
            .load_series(&Scope::aggregate_of(&tenant))
            .await
            .expect("aggregate");
        assert_eq!(alpha[0].payload["total"], json!(1));
        assert_eq!(gamma[0].payload["total"], json!(3));
        assert_eq!(aggregate[0].payload["total"], json!(6));

        let failed = report.outcomes.iter().find(|o| !o.ok()).expect("failure");
        assert_eq!(failed.scope.team, "beta");
    }

    #[tokio::test]
    async fn fan_out_syncs_aggregate_last() {
        let root = TempDir::new().expect("tempdir");
        let tenant = org_tenant();
        let source = ScriptedSource::default().with_teams(&["alpha", "beta"]);
        let backend = Arc::new(FileBackend::new(root.path()));
        let source = Arc::new(source);
        let orchestrator = ScopeOrchestrator::new(source.clone(), backend, true);

        orchestrator.sync_tenant(&tenant).await;

        assert_eq!(
            source.calls(),
            vec![
                "teams",
                "series:alpha",
                "series:beta",
                "series:organization_acme",
            ],
            "teams in listed order, aggregate last"
        );
    }

    #[tokio::test]
    async fn team_designated_tenant_falls_back_to_simple_mode() {
        let root = TempDir::new().expect("tempdir");
        let tenant = org_tenant().with_team("platform");
        let source = Arc::new(
            ScriptedSource::default().with_series("platform", vec![record("2024-01-01", 4)]),
        );
        let backend = Arc::new(FileBackend::new(root.path()));
        let orchestrator = ScopeOrchestrator::new(source.clone(), backend, true);

        let report = orchestrator.sync_tenant(&tenant).await;

        assert!(report.ok());
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].scope.team, "platform");
        assert!(
            !source.calls().iter().any(|c| c == "teams"),
            "no team listing in simple mode"
        );
    }

    #[tokio::test]
    async fn enterprise_tenant_never_fans_out() {
        let root = TempDir::new().expect("tempdir");
        let tenant = Tenant::new(ScopeKind::Enterprise, "globex", "token");
        let source = Arc::new(ScriptedSource::default());
        let backend = Arc::new(FileBackend::new(root.path()));
        let orchestrator = ScopeOrchestrator::new(source.clone(), backend, true);

        let report = orchestrator.sync_tenant(&tenant).await;
        assert_eq!(report.outcomes.len(), 1);
        assert!(!source.calls().iter().any(|c| c == "teams"));
    }

    #[tokio::test]
    async fn failed_team_listing_fails_the_tenant_without_panicking() {
        let root = TempDir::new().expect("tempdir");
        let tenant = org_tenant();

        #[derive(Default)]
        struct NoTeams;
        #[async_trait]
        impl SourceClient for NoTeams {
            async fn fetch_series(&self, _: &Scope) -> Result<Vec<DailyRecord>, SourceError> {
                Ok(Vec::new())
            }
            async fn fetch_roster(&self, _: &Scope) -> Result<Vec<SeatRecord>, SourceError> {
                Ok(Vec::new())
            }
            async fn list_child_teams(&self, scope: &Scope) -> Result<Vec<TeamInfo>, SourceError> {
                Err(SourceError::unavailable(scope.to_string(), "HTTP 500"))
            }
        }

        let backend = Arc::new(FileBackend::new(root.path()));
        let orchestrator = ScopeOrchestrator::new(Arc::new(NoTeams), backend, true);

        let report = orchestrator.sync_tenant(&tenant).await;
        assert!(!report.ok());
        assert_eq!(report.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_stored_series_degrades_to_empty_and_write_repairs() {
        let root = TempDir::new().expect("tempdir");
        let tenant = org_tenant();
        let scope = Scope::of_tenant(&tenant);

        let source = ScriptedSource::default()
            .with_series("organization_acme", vec![record("2024-01-01", 7)]);
        let (orchestrator, backend) = orchestrator(source, &root, false);

        backend.initialize(&scope).await.expect("init");
        std::fs::write(
            backend.scope_dir(&scope).join("organization_acme_usage.json"),
            "garbage",
        )
        .expect("corrupt");

        let report = orchestrator.sync_tenant(&tenant).await;
        assert!(report.ok(), "corrupt read must not fail the scope");

        let stored = backend.load_series(&scope).await.expect("load");
        assert_eq!(stored, vec![record("2024-01-01", 7)]);
    }

    #[tokio::test]
    async fn roster_new_activity_appends_through_the_pipeline() {
        let root = TempDir::new().expect("tempdir");
        let tenant = org_tenant();
        let scope = Scope::of_tenant(&tenant);

        let seed = FileBackend::new(root.path());
        seed.persist_roster(&scope, &[seat(42, "2024-01-01T10:00:00Z")])
            .await
            .expect("seed");

        let source = ScriptedSource::default()
            .with_series("organization_acme", vec![record("2024-01-01", 1)])
            .with_roster("organization_acme", vec![seat(42, "2024-01-02T10:00:00Z")]);
        let (orchestrator, backend) = orchestrator(source, &root, false);

        let report = orchestrator.sync_tenant(&tenant).await;
        assert!(report.ok());
        assert_eq!(report.outcomes[0].roster_added, 1);
        assert_eq!(report.outcomes[0].roster_updated, 0);

        let roster = backend.load_roster(&scope).await.expect("load");
        assert_eq!(roster.len(), 2, "prior activity entry retained");
    }

    #[tokio::test]
    async fn query_surface_reads_last_persisted_state() {
        let root = TempDir::new().expect("tempdir");
        let tenant = org_tenant();
        let scope = Scope::of_tenant(&tenant);

        let source = ScriptedSource::default().with_series(
            "organization_acme",
            vec![record("2024-01-01", 9), record("2024-01-02", 3)],
        );
        let (orchestrator, backend) = orchestrator(source, &root, false);
        orchestrator.sync_tenant(&tenant).await;

        let day = "2024-01-02".parse().expect("date");
        let out = backend
            .query_series(&scope, &SeriesQuery::range(Some(day), Some(day)))
            .await
            .expect("query");
        assert_eq!(out, vec![record("2024-01-02", 3)]);
    }
}
