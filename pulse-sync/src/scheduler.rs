//! Interval scheduler driving sync passes over the active tenant set.
//!
//! One pass walks every active tenant sequentially through the
//! [`ScopeOrchestrator`]. A pass fires eagerly at startup and then on a
//! fixed interval; at most one pass is in flight at a time — a tick that
//! lands while a pass is still running is skipped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use pulse_core::TenantDirectory;

use crate::orchestrator::ScopeOrchestrator;

/// Aggregate result of one sync pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassSummary {
    pub tenants: usize,
    pub tenants_failed: usize,
    pub scopes: usize,
    pub scopes_failed: usize,
    pub duration_ms: u128,
}

pub struct TenantScheduler {
    directory: Arc<dyn TenantDirectory>,
    orchestrator: Arc<ScopeOrchestrator>,
    interval: Duration,
    pass_active: AtomicBool,
}

impl TenantScheduler {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        orchestrator: Arc<ScopeOrchestrator>,
        interval: Duration,
    ) -> Self {
        Self {
            directory,
            orchestrator,
            interval,
            pass_active: AtomicBool::new(false),
        }
    }

    /// Run until the shutdown channel fires. The first pass runs
    /// immediately; subsequent passes follow the configured interval.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "scheduler started");
        self.trigger_pass().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately and would double the eager
        // pass; consume it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.trigger_pass().await;
                }
            }
        }
    }

    /// Run one pass unless another is already in flight, in which case
    /// the trigger is dropped and `None` returned.
    pub async fn trigger_pass(&self) -> Option<PassSummary> {
        if self.pass_active.swap(true, Ordering::SeqCst) {
            tracing::warn!("previous sync pass still running; skipping this trigger");
            return None;
        }
        let summary = self.run_pass().await;
        self.pass_active.store(false, Ordering::SeqCst);
        Some(summary)
    }

    async fn run_pass(&self) -> PassSummary {
        let started = Instant::now();
        let tenants = match self.directory.list_active().await {
            Ok(tenants) => tenants,
            Err(err) => {
                tracing::error!(error = %err, "listing tenants failed; skipping pass");
                return PassSummary::default();
            }
        };

        let mut summary = PassSummary {
            tenants: tenants.len(),
            ..PassSummary::default()
        };

        for tenant in &tenants {
            let report = self.orchestrator.sync_tenant(tenant).await;
            summary.scopes += report.outcomes.len();
            summary.scopes_failed += report.failed_scopes();
            if report.ok() {
                tracing::info!(tenant = %report.tenant, scopes = report.outcomes.len(), "tenant synced");
            } else {
                summary.tenants_failed += 1;
                tracing::error!(
                    tenant = %report.tenant,
                    failed = report.failed_scopes(),
                    scopes = report.outcomes.len(),
                    "tenant sync finished with failures",
                );
            }
        }

        summary.duration_ms = started.elapsed().as_millis();
        tracing::info!(
            tenants = summary.tenants,
            tenants_failed = summary.tenants_failed,
            scopes = summary.scopes,
            scopes_failed = summary.scopes_failed,
            duration_ms = summary.duration_ms,
            "sync pass complete",
        );
        summary
    }
}
