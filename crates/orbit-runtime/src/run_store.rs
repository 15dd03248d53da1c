use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use orbit_core::workflow::{QueryState, SignalHub, WorkflowStatus};
use orbit_core::{OrbitError, Result, UserFacingError};

use crate::engine::{HistoryEvent, RunRecord};

/// An open run on this worker: signal hub, query snapshots, cancellation.
pub struct ActiveRun {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub family: String,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub input: serde_json::Value,
    pub signals: Arc<SignalHub>,
    pub queries: Arc<QueryState>,
    pub cancellation: CancellationToken,
}

struct ClosedRun {
    record: RunRecord,
    queries: HashMap<String, serde_json::Value>,
}

/// Outcome of attempting to open a run for a workflow id.
pub enum BeginOutcome {
    New(Arc<ActiveRun>),
    /// An open run, or a recently closed `RejectDuplicate` run, already
    /// holds this id.
    Existing { run_id: Uuid },
}

/// In-memory state for runs executing on this worker.
///
/// The engine owns durable state; this store routes signals, serves
/// queries (including after close), and keeps recorded activity results
/// for replay.
#[derive(Default)]
pub struct RunStore {
    active: RwLock<HashMap<String, Arc<ActiveRun>>>,
    closed: RwLock<HashMap<String, ClosedRun>>,
    history: RwLock<HashMap<Uuid, Vec<HistoryEvent>>>,
    closed_notify: Notify,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a run for `workflow_id`, enforcing id uniqueness: an open run
    /// always wins; a closed run absorbs the start when `reject_duplicate`
    /// holds and it closed within `dedup_window`.
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        &self,
        workflow_id: &str,
        family: &str,
        input: serde_json::Value,
        attempt: u32,
        reject_duplicate: bool,
        dedup_window: Duration,
        run_id: Option<Uuid>,
        cancellation: CancellationToken,
    ) -> BeginOutcome {
        let mut active = self.active.write().unwrap();
        if let Some(existing) = active.get(workflow_id) {
            return BeginOutcome::Existing {
                run_id: existing.run_id,
            };
        }

        if reject_duplicate {
            let closed = self.closed.read().unwrap();
            if let Some(prior) = closed.get(workflow_id) {
                let recently = prior
                    .record
                    .closed_at
                    .map(|t| Utc::now() - t < chrono::Duration::from_std(dedup_window).unwrap_or_default())
                    .unwrap_or(false);
                if recently {
                    return BeginOutcome::Existing {
                        run_id: prior.record.run_id,
                    };
                }
            }
        }

        let run = Arc::new(ActiveRun {
            run_id: run_id.unwrap_or_else(Uuid::new_v4),
            workflow_id: workflow_id.to_string(),
            family: family.to_string(),
            attempt,
            started_at: Utc::now(),
            input,
            signals: Arc::new(SignalHub::new()),
            queries: Arc::new(QueryState::new()),
            cancellation,
        });
        active.insert(workflow_id.to_string(), run.clone());
        BeginOutcome::New(run)
    }

    pub fn get_active(&self, workflow_id: &str) -> Option<Arc<ActiveRun>> {
        self.active.read().unwrap().get(workflow_id).cloned()
    }

    /// Current record for a workflow id, open or closed.
    pub fn get_record(&self, workflow_id: &str) -> Result<RunRecord> {
        if let Some(run) = self.get_active(workflow_id) {
            return Ok(RunRecord {
                run_id: run.run_id,
                workflow_id: run.workflow_id.clone(),
                family: run.family.clone(),
                attempt: run.attempt,
                status: WorkflowStatus::Running,
                input: run.input.clone(),
                output: None,
                error: None,
                started_at: run.started_at,
                closed_at: None,
            });
        }
        self.closed
            .read()
            .unwrap()
            .get(workflow_id)
            .map(|c| c.record.clone())
            .ok_or_else(|| OrbitError::not_found(format!("run {workflow_id} not found")))
    }

    pub fn deliver_signal(
        &self,
        workflow_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let run = self
            .get_active(workflow_id)
            .ok_or_else(|| OrbitError::not_found(format!("no open run for {workflow_id}")))?;
        run.signals.deliver(name, payload);
        Ok(())
    }

    pub fn request_cancel(&self, workflow_id: &str) -> Result<()> {
        let run = self
            .get_active(workflow_id)
            .ok_or_else(|| OrbitError::not_found(format!("no open run for {workflow_id}")))?;
        run.cancellation.cancel();
        Ok(())
    }

    /// Query snapshots remain readable after the run closes.
    pub fn query(&self, workflow_id: &str, name: &str) -> Result<serde_json::Value> {
        if let Some(run) = self.get_active(workflow_id) {
            return run
                .queries
                .get(name)
                .ok_or_else(|| OrbitError::not_found(format!("query {name} not published")));
        }
        self.closed
            .read()
            .unwrap()
            .get(workflow_id)
            .ok_or_else(|| OrbitError::not_found(format!("run {workflow_id} not found")))?
            .queries
            .get(name)
            .cloned()
            .ok_or_else(|| OrbitError::not_found(format!("query {name} not published")))
    }

    pub fn record_activity(&self, run_id: Uuid, invocation_id: &str, result: serde_json::Value) {
        let mut history = self.history.write().unwrap();
        let events = history.entry(run_id).or_default();
        if let Some(existing) = events.iter_mut().find(|e| e.invocation_id == invocation_id) {
            existing.result = result;
        } else {
            events.push(HistoryEvent {
                invocation_id: invocation_id.to_string(),
                result,
            });
        }
    }

    pub fn history(&self, run_id: Uuid) -> Vec<HistoryEvent> {
        self.history
            .read()
            .unwrap()
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Close a run, retaining its record and query snapshots.
    pub fn finish(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        output: Option<serde_json::Value>,
        error: Option<UserFacingError>,
    ) {
        let Some(run) = self.active.write().unwrap().remove(workflow_id) else {
            return;
        };
        let record = RunRecord {
            run_id: run.run_id,
            workflow_id: run.workflow_id.clone(),
            family: run.family.clone(),
            attempt: run.attempt,
            status,
            input: run.input.clone(),
            output,
            error,
            started_at: run.started_at,
            closed_at: Some(Utc::now()),
        };
        self.closed.write().unwrap().insert(
            workflow_id.to_string(),
            ClosedRun {
                record,
                queries: run.queries.snapshot(),
            },
        );
        self.closed_notify.notify_waiters();
    }

    /// Wait until the run for `workflow_id` closes and return its record.
    pub async fn await_closed(&self, workflow_id: &str) -> RunRecord {
        loop {
            let notified = self.closed_notify.notified();
            if let Some(closed) = self.closed.read().unwrap().get(workflow_id) {
                return closed.record.clone();
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin_default(store: &RunStore, workflow_id: &str) -> BeginOutcome {
        store.begin(
            workflow_id,
            "build",
            serde_json::json!({}),
            1,
            true,
            Duration::from_secs(300),
            None,
            CancellationToken::new(),
        )
    }

    #[test]
    fn open_run_absorbs_duplicate_start() {
        let store = RunStore::new();
        let BeginOutcome::New(run) = begin_default(&store, "build:app-1:1") else {
            panic!("expected new run");
        };
        match begin_default(&store, "build:app-1:1") {
            BeginOutcome::Existing { run_id } => assert_eq!(run_id, run.run_id),
            BeginOutcome::New(_) => panic!("duplicate start must not open a second run"),
        }
    }

    #[test]
    fn recently_closed_reject_duplicate_absorbs() {
        let store = RunStore::new();
        let BeginOutcome::New(run) = begin_default(&store, "topic-created-sync:vc-1:abc") else {
            panic!("expected new run");
        };
        let first_run_id = run.run_id;
        store.finish(
            "topic-created-sync:vc-1:abc",
            WorkflowStatus::Completed,
            Some(serde_json::json!({})),
            None,
        );

        match begin_default(&store, "topic-created-sync:vc-1:abc") {
            BeginOutcome::Existing { run_id } => assert_eq!(run_id, first_run_id),
            BeginOutcome::New(_) => panic!("replay within dedup window must be a no-op"),
        }
    }

    #[test]
    fn closed_run_outside_window_starts_fresh() {
        let store = RunStore::new();
        let BeginOutcome::New(_) = begin_default(&store, "token-refresh:inst-1") else {
            panic!("expected new run");
        };
        store.finish("token-refresh:inst-1", WorkflowStatus::Completed, None, None);

        // Zero-width window: the closed run no longer absorbs starts.
        match store.begin(
            "token-refresh:inst-1",
            "token-refresh",
            serde_json::json!({}),
            1,
            true,
            Duration::ZERO,
            None,
            CancellationToken::new(),
        ) {
            BeginOutcome::New(_) => {}
            BeginOutcome::Existing { .. } => panic!("expired dedup window must not absorb"),
        }
    }

    #[test]
    fn queries_survive_close() {
        let store = RunStore::new();
        let BeginOutcome::New(run) = begin_default(&store, "template-instantiation:j1") else {
            panic!("expected new run");
        };
        run.queries
            .publish("progress", serde_json::json!({"percent": 1.0}));
        store.finish(
            "template-instantiation:j1",
            WorkflowStatus::Completed,
            None,
            None,
        );

        let snapshot = store.query("template-instantiation:j1", "progress").unwrap();
        assert_eq!(snapshot["percent"], 1.0);
    }

    #[test]
    fn signal_to_closed_run_is_not_found() {
        let store = RunStore::new();
        let BeginOutcome::New(_) = begin_default(&store, "build:app-1:1") else {
            panic!("expected new run");
        };
        store.finish("build:app-1:1", WorkflowStatus::Failed, None, None);
        let err = store
            .deliver_signal("build:app-1:1", "user_choice", serde_json::json!("x"))
            .unwrap_err();
        assert_eq!(err.kind, orbit_core::ErrorKind::NotFound);
    }

    #[test]
    fn history_records_deduplicate_by_invocation() {
        let store = RunStore::new();
        let run_id = Uuid::new_v4();
        store.record_activity(run_id, "fetch#0", serde_json::json!(1));
        store.record_activity(run_id, "fetch#0", serde_json::json!(2));
        store.record_activity(run_id, "store#1", serde_json::json!(3));

        let history = store.history(run_id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].result, serde_json::json!(2));
    }

    #[tokio::test]
    async fn await_closed_wakes_on_finish() {
        let store = Arc::new(RunStore::new());
        let BeginOutcome::New(_) = begin_default(&store, "deployment:app-1:1") else {
            panic!("expected new run");
        };

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.await_closed("deployment:app-1:1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.finish(
            "deployment:app-1:1",
            WorkflowStatus::Completed,
            Some(serde_json::json!({"ok": true})),
            None,
        );

        let record = waiter.await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Completed);
    }
}
