//! Per-run pipeline progress.
//!
//! Every extraction pipeline gets its own run id and progress entry, so
//! concurrent requests never overwrite each other's progress. The registry
//! also remembers the most recently started run for subscribers that connect
//! without a run id.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::extraction::{ProgressSink, TaskState};

/// Failure message for runs whose caller went away before they settled.
pub const CANCELLED_MESSAGE: &str = "Cancelled";

/// Snapshot of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RunProgress {
    pub run_id: Uuid,
    /// Completion percentage, 0–100
    pub percent: u8,
    pub state: TaskState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Failure summary (never raw subprocess output)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Default)]
struct RegistryInner {
    runs: HashMap<Uuid, RunProgress>,
    latest: Option<Uuid>,
}

/// Which run a subscriber follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressTarget {
    Run(Uuid),
    /// The most recently started run.
    Latest,
}

/// Shared registry of pipeline runs.
#[derive(Clone)]
pub struct ProgressRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    retention: Duration,
}

impl ProgressRegistry {
    /// `retention` controls how long finished runs stay readable.
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            retention,
        }
    }

    /// Register a run at 0%, reusing a client-supplied id when given.
    pub fn start_run(&self, run_id: Option<Uuid>) -> ProgressHandle {
        let run_id = run_id.unwrap_or_else(Uuid::new_v4);
        let now = Utc::now();
        let mut inner = self.inner.write();
        self.prune(&mut inner, now);
        inner.runs.insert(
            run_id,
            RunProgress {
                run_id,
                percent: 0,
                state: TaskState::Running,
                started_at: now,
                updated_at: now,
                message: None,
            },
        );
        inner.latest = Some(run_id);
        tracing::debug!(%run_id, "Progress run started");
        ProgressHandle {
            registry: self.clone(),
            run_id,
        }
    }

    pub fn get(&self, run_id: Uuid) -> Option<RunProgress> {
        self.inner.read().runs.get(&run_id).cloned()
    }

    pub fn latest(&self) -> Option<RunProgress> {
        let inner = self.inner.read();
        inner.latest.and_then(|id| inner.runs.get(&id).cloned())
    }

    /// Current percentage for a target; unknown runs read as 0.
    pub fn percent(&self, target: ProgressTarget) -> u8 {
        let run = match target {
            ProgressTarget::Run(id) => self.get(id),
            ProgressTarget::Latest => self.latest(),
        };
        run.map(|r| r.percent).unwrap_or(0)
    }

    fn update(&self, run_id: Uuid, percent: u8) {
        let mut inner = self.inner.write();
        if let Some(run) = inner.runs.get_mut(&run_id) {
            run.percent = percent.min(100);
            run.updated_at = Utc::now();
        }
    }

    fn finish(&self, run_id: Uuid, state: TaskState, message: Option<String>) {
        let mut inner = self.inner.write();
        if let Some(run) = inner.runs.get_mut(&run_id) {
            if state == TaskState::Succeeded {
                run.percent = 100;
            }
            run.state = state;
            run.message = message;
            run.updated_at = Utc::now();
        }
    }

    /// Drop finished runs older than the retention window.
    fn prune(&self, inner: &mut RegistryInner, now: DateTime<Utc>) {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let latest = inner.latest;
        inner.runs.retain(|id, run| {
            let finished = matches!(run.state, TaskState::Succeeded | TaskState::Failed);
            Some(*id) == latest || !finished || now - run.updated_at < retention
        });
    }
}

/// Write access to a single run's progress.
#[derive(Clone)]
pub struct ProgressHandle {
    registry: ProgressRegistry,
    run_id: Uuid,
}

impl ProgressHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn update(&self, percent: u8) {
        self.registry.update(self.run_id, percent);
    }

    pub fn succeed(&self) {
        self.registry.finish(self.run_id, TaskState::Succeeded, None);
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.registry
            .finish(self.run_id, TaskState::Failed, Some(message.into()));
    }

    /// A sink mapping a sub-task's 0–100 onto `[low, high]` of this run.
    pub fn sink(&self, low: u8, high: u8) -> ProgressSink {
        let handle = self.clone();
        let span = high.saturating_sub(low) as u32;
        Arc::new(move |p: u8| {
            let scaled = low as u32 + span * p.min(100) as u32 / 100;
            handle.update(scaled as u8);
        })
    }
}

/// Owns a run until it settles. Dropping an unsettled run marks it failed,
/// so abandoned requests never leave a run `running` forever.
pub struct RunGuard {
    handle: ProgressHandle,
    settled: bool,
}

impl RunGuard {
    pub fn new(handle: ProgressHandle) -> Self {
        Self {
            handle,
            settled: false,
        }
    }

    pub fn handle(&self) -> &ProgressHandle {
        &self.handle
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.handle.succeed();
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.settled = true;
        self.handle.fail(message);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(run_id = %self.handle.run_id, "Run abandoned before finishing");
            self.handle.fail(CANCELLED_MESSAGE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ProgressRegistry {
        ProgressRegistry::new(Duration::from_secs(600))
    }

    #[test]
    fn test_start_run_resets_to_zero() {
        let reg = registry();
        let handle = reg.start_run(None);
        handle.update(40);
        let again = reg.start_run(Some(handle.run_id()));
        assert_eq!(again.run_id(), handle.run_id());
        assert_eq!(reg.percent(ProgressTarget::Run(handle.run_id())), 0);
    }

    #[test]
    fn test_update_clamps_to_100() {
        let reg = registry();
        let handle = reg.start_run(None);
        handle.update(250);
        assert_eq!(reg.percent(ProgressTarget::Run(handle.run_id())), 100);
    }

    #[test]
    fn test_unknown_run_reads_zero() {
        let reg = registry();
        assert_eq!(reg.percent(ProgressTarget::Run(Uuid::new_v4())), 0);
        assert_eq!(reg.percent(ProgressTarget::Latest), 0);
    }

    #[test]
    fn test_runs_do_not_interfere() {
        let reg = registry();
        let a = reg.start_run(None);
        let b = reg.start_run(None);
        a.update(30);
        b.update(80);
        assert_eq!(reg.percent(ProgressTarget::Run(a.run_id())), 30);
        assert_eq!(reg.percent(ProgressTarget::Run(b.run_id())), 80);
        assert_eq!(reg.percent(ProgressTarget::Latest), 80);
    }

    #[test]
    fn test_succeed_sets_100_and_state() {
        let reg = registry();
        let handle = reg.start_run(None);
        handle.update(90);
        handle.succeed();
        let run = reg.get(handle.run_id()).unwrap();
        assert_eq!(run.percent, 100);
        assert_eq!(run.state, TaskState::Succeeded);
    }

    #[test]
    fn test_fail_keeps_percent() {
        let reg = registry();
        let handle = reg.start_run(None);
        handle.update(35);
        handle.fail("extraction failed");
        let run = reg.get(handle.run_id()).unwrap();
        assert_eq!(run.percent, 35);
        assert_eq!(run.state, TaskState::Failed);
        assert_eq!(run.message.as_deref(), Some("extraction failed"));
    }

    #[test]
    fn test_sink_scales_into_band() {
        let reg = registry();
        let handle = reg.start_run(None);
        let sink = handle.sink(10, 70);
        sink(0);
        assert_eq!(reg.percent(ProgressTarget::Run(handle.run_id())), 10);
        sink(50);
        assert_eq!(reg.percent(ProgressTarget::Run(handle.run_id())), 40);
        sink(100);
        assert_eq!(reg.percent(ProgressTarget::Run(handle.run_id())), 70);
    }

    #[test]
    fn test_finished_runs_pruned_after_retention() {
        let reg = ProgressRegistry::new(Duration::ZERO);
        let old = reg.start_run(None);
        old.succeed();
        let running = reg.start_run(None);
        let _newest = reg.start_run(None);
        assert!(reg.get(old.run_id()).is_none());
        assert!(reg.get(running.run_id()).is_some());
    }

    #[test]
    fn test_dropped_guard_fails_unsettled_run() {
        let reg = registry();
        let guard = RunGuard::new(reg.start_run(None));
        let run_id = guard.handle().run_id();
        guard.handle().update(40);
        drop(guard);

        let run = reg.get(run_id).unwrap();
        assert_eq!(run.state, TaskState::Failed);
        assert_eq!(run.percent, 40);
        assert_eq!(run.message.as_deref(), Some(CANCELLED_MESSAGE));
    }

    #[test]
    fn test_settled_guard_keeps_outcome() {
        let reg = registry();
        let guard = RunGuard::new(reg.start_run(None));
        let run_id = guard.handle().run_id();
        guard.succeed();

        let run = reg.get(run_id).unwrap();
        assert_eq!(run.state, TaskState::Succeeded);
        assert_eq!(run.message, None);
    }
}
