//! GitHub Copilot API client implementing [`SourceClient`].
//!
//! Endpoints per scope kind:
//!
//! ```text
//! series   GET /orgs/{org}/copilot/metrics
//!          GET /orgs/{org}/team/{slug}/copilot/metrics
//!          GET /enterprises/{ent}/copilot/metrics
//!          GET /enterprises/{ent}/team/{slug}/copilot/metrics
//! roster   GET /orgs/{org}/copilot/billing/seats?per_page=100&page=N
//!          GET /enterprises/{ent}/copilot/billing/seats?per_page=100&page=N
//! teams    GET /orgs/{org}/teams?per_page=100&page=N
//! ```
//!
//! Seat billing is scoped to the organization/enterprise, never to a team;
//! a team scope's roster is the parent roster filtered by assigning team.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use pulse_core::types::{DailyRecord, Scope, ScopeKind, SeatRecord};
use pulse_sync::{SourceClient, SourceError, TeamInfo};

const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;

pub struct GithubSourceClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubSourceClient {
    pub fn new(api_base: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("pulse-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn series_url(&self, scope: &Scope) -> String {
        let root = self.scope_root(scope);
        if scope.team.is_empty() {
            format!("{root}/copilot/metrics")
        } else {
            format!("{root}/team/{}/copilot/metrics", scope.team)
        }
    }

    fn roster_url(&self, scope: &Scope, page: usize) -> String {
        format!(
            "{}/copilot/billing/seats?per_page={PAGE_SIZE}&page={page}",
            self.scope_root(scope),
        )
    }

    fn teams_url(&self, scope: &Scope, page: usize) -> String {
        format!("{}/teams?per_page={PAGE_SIZE}&page={page}", self.scope_root(scope))
    }

    fn scope_root(&self, scope: &Scope) -> String {
        match scope.kind {
            ScopeKind::Organization => format!("{}/orgs/{}", self.api_base, scope.name),
            ScopeKind::Enterprise => format!("{}/enterprises/{}", self.api_base, scope.name),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        credential: &str,
        context: &str,
    ) -> Result<T, SourceError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(credential)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await
            .map_err(|err| SourceError::unavailable(context, err.to_string()))?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
        ) {
            return Err(SourceError::invalid_tenant(context, format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(SourceError::unavailable(context, format!("HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|err| SourceError::unavailable(context, err.to_string()))
    }
}

#[async_trait]
impl SourceClient for GithubSourceClient {
    async fn fetch_series(&self, scope: &Scope) -> Result<Vec<DailyRecord>, SourceError> {
        let url = self.series_url(scope);
        self.get_json(&url, &scope.credential, &format!("series {scope}"))
            .await
    }

    async fn fetch_roster(&self, scope: &Scope) -> Result<Vec<SeatRecord>, SourceError> {
        let context = format!("roster {scope}");
        let mut raw = Vec::new();
        let mut page = 1;
        loop {
            let url = self.roster_url(scope, page);
            let body: SeatPage = self.get_json(&url, &scope.credential, &context).await?;
            let count = body.seats.len();
            raw.extend(body.seats);
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(roster_for_scope(raw, scope))
    }

    async fn list_child_teams(&self, scope: &Scope) -> Result<Vec<TeamInfo>, SourceError> {
        // Enterprises have no team listing endpoint.
        if scope.kind != ScopeKind::Organization {
            return Ok(Vec::new());
        }

        let context = format!("teams {scope}");
        let mut teams = Vec::new();
        let mut page = 1;
        loop {
            let url = self.teams_url(scope, page);
            let body: Vec<TeamInfo> = self.get_json(&url, &scope.credential, &context).await?;
            let count = body.len();
            teams.extend(body);
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(teams)
    }
}

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SeatPage {
    #[serde(default)]
    seats: Vec<RawSeat>,
}

#[derive(Debug, Deserialize)]
struct RawSeat {
    assignee: Assignee,
    #[serde(default)]
    assigning_team: Option<TeamRef>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_activity_editor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Assignee {
    login: String,
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TeamRef {
    slug: String,
}

/// Project the billing roster onto one scope. Team scopes keep only seats
/// assigned through that team; aggregate scopes keep everything.
fn roster_for_scope(raw: Vec<RawSeat>, scope: &Scope) -> Vec<SeatRecord> {
    raw.into_iter()
        .filter(|seat| {
            scope.team.is_empty()
                || seat
                    .assigning_team
                    .as_ref()
                    .map(|team| team.slug.eq_ignore_ascii_case(&scope.team))
                    .unwrap_or(false)
        })
        .map(seat_record)
        .collect()
}

fn seat_record(raw: RawSeat) -> SeatRecord {
    SeatRecord {
        login: raw.assignee.login,
        id: raw.assignee.id,
        team: raw
            .assigning_team
            .map(|team| team.slug)
            .unwrap_or_default(),
        created_at: raw.created_at,
        last_activity_at: raw.last_activity_at,
        last_activity_editor: raw.last_activity_editor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::types::Tenant;
    use serde_json::json;

    fn client() -> GithubSourceClient {
        GithubSourceClient::new("https://api.github.com/").expect("client")
    }

    fn org_tenant() -> Tenant {
        Tenant::new(ScopeKind::Organization, "acme", "token")
    }

    #[test]
    fn series_urls_per_scope_shape() {
        let client = client();
        let tenant = org_tenant();
        assert_eq!(
            client.series_url(&Scope::aggregate_of(&tenant)),
            "https://api.github.com/orgs/acme/copilot/metrics"
        );
        assert_eq!(
            client.series_url(&Scope::team_of(&tenant, "platform")),
            "https://api.github.com/orgs/acme/team/platform/copilot/metrics"
        );

        let enterprise = Tenant::new(ScopeKind::Enterprise, "globex", "token");
        assert_eq!(
            client.series_url(&Scope::aggregate_of(&enterprise)),
            "https://api.github.com/enterprises/globex/copilot/metrics"
        );
    }

    #[test]
    fn roster_url_paginates_at_one_hundred() {
        let client = client();
        let scope = Scope::aggregate_of(&org_tenant());
        assert_eq!(
            client.roster_url(&scope, 3),
            "https://api.github.com/orgs/acme/copilot/billing/seats?per_page=100&page=3"
        );
    }

    #[test]
    fn seat_page_parses_billing_payload() {
        let page: SeatPage = serde_json::from_value(json!({
            "total_seats": 2,
            "seats": [
                {
                    "assignee": { "login": "octocat", "id": 42 },
                    "assigning_team": { "slug": "platform", "id": 7 },
                    "created_at": "2024-01-01T00:00:00Z",
                    "last_activity_at": "2024-02-01T12:30:00Z",
                    "last_activity_editor": "vscode/1.96"
                },
                {
                    "assignee": { "login": "hubot", "id": 43 },
                    "created_at": "2024-01-05T00:00:00Z",
                    "last_activity_at": null
                }
            ]
        }))
        .expect("parse");

        assert_eq!(page.seats.len(), 2);
        let first = seat_record(page.seats.into_iter().next().expect("seat"));
        assert_eq!(first.login, "octocat");
        assert_eq!(first.id, 42);
        assert_eq!(first.team, "platform");
        assert_eq!(first.last_activity_editor.as_deref(), Some("vscode/1.96"));
    }

    #[test]
    fn team_scope_keeps_only_its_assigning_team() {
        let page: SeatPage = serde_json::from_value(json!({
            "seats": [
                {
                    "assignee": { "login": "octocat", "id": 42 },
                    "assigning_team": { "slug": "Platform" },
                    "created_at": "2024-01-01T00:00:00Z"
                },
                {
                    "assignee": { "login": "hubot", "id": 43 },
                    "assigning_team": { "slug": "api" },
                    "created_at": "2024-01-01T00:00:00Z"
                },
                {
                    "assignee": { "login": "direct", "id": 44 },
                    "created_at": "2024-01-01T00:00:00Z"
                }
            ]
        }))
        .expect("parse");

        let tenant = org_tenant();
        assert!(roster_for_scope(Vec::new(), &Scope::team_of(&tenant, "platform")).is_empty());

        let filtered = roster_for_scope(page.seats, &Scope::team_of(&tenant, "platform"));
        assert_eq!(filtered.len(), 1, "slug match is case-insensitive");
        assert_eq!(filtered[0].login, "octocat");
    }

    #[test]
    fn aggregate_scope_keeps_every_seat() {
        let page: SeatPage = serde_json::from_value(json!({
            "seats": [
                {
                    "assignee": { "login": "octocat", "id": 42 },
                    "assigning_team": { "slug": "platform" },
                    "created_at": "2024-01-01T00:00:00Z"
                },
                {
                    "assignee": { "login": "direct", "id": 44 },
                    "created_at": "2024-01-01T00:00:00Z"
                }
            ]
        }))
        .expect("parse");

        let roster = roster_for_scope(page.seats, &Scope::aggregate_of(&org_tenant()));
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[1].team, "", "directly assigned seat has no team");
    }
}
