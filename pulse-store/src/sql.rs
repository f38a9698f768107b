//! Relational backend — SQLite via sqlx.
//!
//! # Schema
//!
//! ```text
//! daily_records    one row per (date, scope_kind, scope_name, team),
//!                  uniqueness enforced, payload stored as JSON text
//! seat_records     one row per (scope, seat_id, last_activity_at) with a
//!                  refresh_time batch marker set on every persisting sync
//! fetch_snapshots  append-only raw-fetch audit trail, one row per sync
//! tenants          registration records, identity-unique (NOCASE)
//! ```
//!
//! The pool is constructed once at the composition root and shared by all
//! scopes; no connection is held across an await boundary longer than one
//! statement or transaction.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, SqlitePool};

use pulse_core::directory::TenantDirectory;
use pulse_core::error::DirectoryError;
use pulse_core::types::{DailyRecord, Scope, ScopeKind, SeatRecord, Tenant};

use crate::backend::{SeriesQuery, StorageBackend, DEFAULT_PAGE_SIZE};
use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS daily_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    scope_kind TEXT NOT NULL,
    scope_name TEXT NOT NULL,
    team TEXT NOT NULL DEFAULT '',
    payload TEXT NOT NULL,
    UNIQUE (date, scope_kind, scope_name, team)
);
CREATE TABLE IF NOT EXISTS seat_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scope_kind TEXT NOT NULL,
    scope_name TEXT NOT NULL,
    scope_team TEXT NOT NULL DEFAULT '',
    seat_id INTEGER NOT NULL,
    login TEXT NOT NULL,
    team TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    last_activity_at TEXT NOT NULL DEFAULT '',
    last_activity_editor TEXT,
    refresh_time TEXT NOT NULL,
    UNIQUE (scope_kind, scope_name, scope_team, seat_id, last_activity_at)
);
CREATE TABLE IF NOT EXISTS fetch_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    family TEXT NOT NULL,
    scope_kind TEXT NOT NULL,
    scope_name TEXT NOT NULL,
    team TEXT NOT NULL DEFAULT '',
    captured_at TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tenants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scope_kind TEXT NOT NULL,
    scope_name TEXT NOT NULL COLLATE NOCASE,
    team TEXT NOT NULL DEFAULT '' COLLATE NOCASE,
    credential TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    UNIQUE (scope_name, scope_kind, team)
);
"#;

async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

fn encode_activity(at: &Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn decode_timestamp(context: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            context: context.to_string(),
            message: format!("bad timestamp {raw:?}: {e}"),
        })
}

fn decode_seat_row(scope: &Scope, row: &sqlx::sqlite::SqliteRow) -> Result<SeatRecord, StoreError> {
    let context = format!("seat_records for {scope}");
    let activity: String = row.get("last_activity_at");
    let last_activity_at = if activity.is_empty() {
        None
    } else {
        Some(decode_timestamp(&context, &activity)?)
    };
    Ok(SeatRecord {
        login: row.get("login"),
        id: row.get("seat_id"),
        team: row.get("team"),
        created_at: decode_timestamp(&context, row.get::<String, _>("created_at").as_str())?,
        last_activity_at,
        last_activity_editor: row.get("last_activity_editor"),
    })
}

fn decode_daily_row(scope: &Scope, row: &sqlx::sqlite::SqliteRow) -> Result<DailyRecord, StoreError> {
    let context = format!("daily_records for {scope}");
    let date_raw: String = row.get("date");
    let date = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d").map_err(|e| {
        StoreError::CorruptRow {
            context: context.clone(),
            message: format!("bad date {date_raw:?}: {e}"),
        }
    })?;
    let payload_raw: String = row.get("payload");
    let payload = serde_json::from_str(&payload_raw).map_err(|e| StoreError::CorruptRow {
        context,
        message: format!("bad payload JSON: {e}"),
    })?;
    Ok(DailyRecord { date, payload })
}

// ---------------------------------------------------------------------------
// RelationalBackend
// ---------------------------------------------------------------------------

/// SQLite-backed [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct RelationalBackend {
    pool: SqlitePool,
}

impl RelationalBackend {
    /// Wrap an already-constructed pool (the composition root owns it).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `url` (e.g. `sqlite:pulse.db` or `sqlite::memory:`),
    /// creating the database file if missing.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl StorageBackend for RelationalBackend {
    async fn initialize(&self, _scope: &Scope) -> Result<(), StoreError> {
        // CREATE IF NOT EXISTS throughout, so repeated and concurrent
        // initialization is safe.
        ensure_schema(&self.pool).await?;
        Ok(())
    }

    async fn load_series(&self, scope: &Scope) -> Result<Vec<DailyRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT date, payload FROM daily_records \
             WHERE scope_kind = ?1 AND scope_name = ?2 AND team = ?3 \
             ORDER BY date ASC",
        )
        .bind(scope.kind.to_string())
        .bind(&scope.name)
        .bind(&scope.team)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| decode_daily_row(scope, row)).collect()
    }

    async fn load_roster(&self, scope: &Scope) -> Result<Vec<SeatRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT login, seat_id, team, created_at, last_activity_at, last_activity_editor \
             FROM seat_records \
             WHERE scope_kind = ?1 AND scope_name = ?2 AND scope_team = ?3 \
             ORDER BY login ASC, last_activity_at ASC",
        )
        .bind(scope.kind.to_string())
        .bind(&scope.name)
        .bind(&scope.team)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| decode_seat_row(scope, row)).collect()
    }

    async fn persist_series(
        &self,
        scope: &Scope,
        records: &[DailyRecord],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO daily_records (date, scope_kind, scope_name, team, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (date, scope_kind, scope_name, team) \
                 DO UPDATE SET payload = excluded.payload",
            )
            .bind(record.date.format("%Y-%m-%d").to_string())
            .bind(scope.kind.to_string())
            .bind(&scope.name)
            .bind(&scope.team)
            .bind(serde_json::to_string(&record.payload)?)
            .execute(&mut *tx)
            .await?;
        }

        // Full replace: rows for dates absent from the incoming series are
        // dropped, so the persisted series is exactly `records`.
        let mut del = QueryBuilder::new("DELETE FROM daily_records WHERE scope_kind = ");
        del.push_bind(scope.kind.to_string());
        del.push(" AND scope_name = ").push_bind(&scope.name);
        del.push(" AND team = ").push_bind(&scope.team);
        if !records.is_empty() {
            del.push(" AND date NOT IN (");
            let mut dates = del.separated(", ");
            for record in records {
                dates.push_bind(record.date.format("%Y-%m-%d").to_string());
            }
            del.push(")");
        }
        del.build().execute(&mut *tx).await?;

        tx.commit().await?;
        tracing::debug!(scope = %scope, records = records.len(), "series persisted");
        Ok(())
    }

    async fn persist_roster(
        &self,
        scope: &Scope,
        records: &[SeatRecord],
    ) -> Result<(), StoreError> {
        // Roster history is append-only at the row level; each persisting
        // sync stamps the rows it touched with the same refresh_time.
        let refresh_time = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        for seat in records {
            sqlx::query(
                "INSERT INTO seat_records \
                 (scope_kind, scope_name, scope_team, seat_id, login, team, \
                  created_at, last_activity_at, last_activity_editor, refresh_time) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT (scope_kind, scope_name, scope_team, seat_id, last_activity_at) \
                 DO UPDATE SET login = excluded.login, team = excluded.team, \
                   created_at = excluded.created_at, \
                   last_activity_editor = excluded.last_activity_editor, \
                   refresh_time = excluded.refresh_time",
            )
            .bind(scope.kind.to_string())
            .bind(&scope.name)
            .bind(&scope.team)
            .bind(seat.id)
            .bind(&seat.login)
            .bind(&seat.team)
            .bind(seat.created_at.to_rfc3339())
            .bind(encode_activity(&seat.last_activity_at))
            .bind(&seat.last_activity_editor)
            .bind(&refresh_time)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn snapshot_series(
        &self,
        scope: &Scope,
        records: &[DailyRecord],
    ) -> Result<(), StoreError> {
        self.insert_snapshot(scope, "usage", serde_json::to_string(records)?)
            .await
    }

    async fn snapshot_roster(
        &self,
        scope: &Scope,
        records: &[SeatRecord],
    ) -> Result<(), StoreError> {
        self.insert_snapshot(scope, "seats", serde_json::to_string(records)?)
            .await
    }

    async fn query_series(
        &self,
        scope: &Scope,
        query: &SeriesQuery,
    ) -> Result<Vec<DailyRecord>, StoreError> {
        let mut qb = QueryBuilder::new(
            "SELECT date, payload FROM daily_records WHERE scope_kind = ",
        );
        qb.push_bind(scope.kind.to_string());
        qb.push(" AND scope_name = ").push_bind(&scope.name);
        qb.push(" AND team = ").push_bind(&scope.team);
        // Dates are stored as ISO "YYYY-MM-DD", so lexicographic compare is
        // date order and bounds stay inclusive.
        if let Some(since) = query.since {
            qb.push(" AND date >= ")
                .push_bind(since.format("%Y-%m-%d").to_string());
        }
        if let Some(until) = query.until {
            qb.push(" AND date <= ")
                .push_bind(until.format("%Y-%m-%d").to_string());
        }
        qb.push(" ORDER BY date ASC LIMIT ")
            .push_bind(query.page_size as i64);
        qb.push(" OFFSET ").push_bind(query.offset() as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode_daily_row(scope, row)).collect()
    }

    async fn query_roster(
        &self,
        scope: &Scope,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<Vec<SeatRecord>, StoreError> {
        let page = page.unwrap_or(1);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        let rows = sqlx::query(
            "SELECT login, seat_id, team, created_at, last_activity_at, last_activity_editor \
             FROM seat_records \
             WHERE scope_kind = ?1 AND scope_name = ?2 AND scope_team = ?3 \
             ORDER BY login ASC, last_activity_at ASC \
             LIMIT ?4 OFFSET ?5",
        )
        .bind(scope.kind.to_string())
        .bind(&scope.name)
        .bind(&scope.team)
        .bind(page_size as i64)
        .bind((page.saturating_sub(1) * page_size) as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| decode_seat_row(scope, row)).collect()
    }
}

impl RelationalBackend {
    async fn insert_snapshot(
        &self,
        scope: &Scope,
        family: &str,
        payload: String,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO fetch_snapshots (family, scope_kind, scope_name, team, captured_at, payload) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(family)
        .bind(scope.kind.to_string())
        .bind(&scope.name)
        .bind(&scope.team)
        .bind(Utc::now().to_rfc3339())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SqlTenantDirectory
// ---------------------------------------------------------------------------

/// SQLite-backed [`TenantDirectory`] sharing the backend's pool.
#[derive(Debug, Clone)]
pub struct SqlTenantDirectory {
    pool: SqlitePool,
}

impl SqlTenantDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn ensure(&self) -> Result<(), DirectoryError> {
        ensure_schema(&self.pool).await.map_err(db_err)
    }
}

fn db_err(e: sqlx::Error) -> DirectoryError {
    DirectoryError::Unavailable(e.to_string())
}

fn decode_tenant_row(row: &sqlx::sqlite::SqliteRow) -> Result<Tenant, DirectoryError> {
    let kind_raw: String = row.get("scope_kind");
    let scope_kind = ScopeKind::parse(&kind_raw)
        .ok_or_else(|| DirectoryError::Unavailable(format!("bad scope_kind {kind_raw:?}")))?;
    Ok(Tenant {
        scope_kind,
        scope_name: row.get("scope_name"),
        credential: row.get("credential"),
        default_team: row.get("team"),
        active: row.get::<i64, _>("active") != 0,
    })
}

#[async_trait]
impl TenantDirectory for SqlTenantDirectory {
    async fn list_active(&self) -> Result<Vec<Tenant>, DirectoryError> {
        self.ensure().await?;
        let rows = sqlx::query(
            "SELECT scope_kind, scope_name, team, credential, active FROM tenants \
             WHERE active = 1 ORDER BY scope_name ASC, team ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(decode_tenant_row).collect()
    }

    async fn save(&self, tenant: &Tenant) -> Result<bool, DirectoryError> {
        self.ensure().await?;
        // NOCASE collation on scope_name/team makes the identity match
        // case-insensitive, both here and in the unique constraint.
        let existing = sqlx::query(
            "SELECT id FROM tenants WHERE scope_name = ?1 AND scope_kind = ?2 AND team = ?3",
        )
        .bind(&tenant.scope_name)
        .bind(tenant.scope_kind.to_string())
        .bind(&tenant.default_team)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "INSERT INTO tenants (scope_kind, scope_name, team, credential, active) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (scope_name, scope_kind, team) \
             DO UPDATE SET credential = excluded.credential, active = excluded.active",
        )
        .bind(tenant.scope_kind.to_string())
        .bind(&tenant.scope_name)
        .bind(&tenant.default_team)
        .bind(&tenant.credential)
        .bind(tenant.active as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(existing.is_some())
    }

    async fn remove(&self, tenant: &Tenant) -> Result<bool, DirectoryError> {
        self.ensure().await?;
        let result = sqlx::query(
            "DELETE FROM tenants WHERE scope_name = ?1 AND scope_kind = ?2 AND team = ?3",
        )
        .bind(&tenant.scope_name)
        .bind(tenant.scope_kind.to_string())
        .bind(&tenant.default_team)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_scope_name(&self, name: &str) -> Result<Option<Tenant>, DirectoryError> {
        self.ensure().await?;
        let row = sqlx::query(
            "SELECT scope_kind, scope_name, team, credential, active FROM tenants \
             WHERE scope_name = ?1 ORDER BY team ASC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(decode_tenant_row).transpose()
    }
}
