mod grpc;
mod proto;

pub use grpc::GrpcEngine;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use orbit_core::workflow::{IdReusePolicy, WorkflowId, WorkflowStatus};
use orbit_core::{Result, ScheduleSpec, UserFacingError};

/// Options for starting a workflow. `id_reuse` of `None` defers to the
/// family's registered policy.
#[derive(Debug, Clone)]
pub struct StartWorkflowOptions {
    pub workflow_id: WorkflowId,
    pub family: String,
    pub input: serde_json::Value,
    pub id_reuse: Option<IdReusePolicy>,
}

impl StartWorkflowOptions {
    pub fn new(workflow_id: WorkflowId, family: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            workflow_id,
            family: family.into(),
            input,
            id_reuse: None,
        }
    }
}

/// Handle to a (possibly pre-existing) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub workflow_id: String,
}

/// Outcome of a start request. `RejectDuplicate` re-submissions surface as
/// `AlreadyRunning` with the existing handle, never as an error.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    Started(RunHandle),
    AlreadyRunning(RunHandle),
}

impl StartOutcome {
    pub fn handle(&self) -> &RunHandle {
        match self {
            Self::Started(h) | Self::AlreadyRunning(h) => h,
        }
    }

    pub fn started_new_run(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Run record surfaced by the engine.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub family: String,
    pub attempt: u32,
    pub status: WorkflowStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<UserFacingError>,
    pub started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// A recorded activity (or child) completion, replayed on resume.
#[derive(Debug, Clone)]
pub struct HistoryEvent {
    pub invocation_id: String,
    pub result: serde_json::Value,
}

/// The contract the orchestrator requires from the workflow engine.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn start_workflow(&self, opts: StartWorkflowOptions) -> Result<StartOutcome>;
    async fn signal_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<()>;
    async fn query_workflow(&self, workflow_id: &str, name: &str) -> Result<serde_json::Value>;
    async fn cancel_workflow(&self, workflow_id: &str) -> Result<()>;
    async fn get_run(&self, workflow_id: &str) -> Result<RunRecord>;
    async fn get_history(&self, run_id: Uuid) -> Result<Vec<HistoryEvent>>;
    async fn create_schedule(&self, spec: ScheduleSpec) -> Result<String>;
    async fn get_schedule(&self, schedule_id: &str) -> Result<ScheduleSpec>;
}

/// A workflow task dispatched to this worker.
#[derive(Debug, Clone)]
pub struct WorkflowTask {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub family: String,
    pub input: serde_json::Value,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    /// Recorded completions from prior executions of this run.
    pub prior_events: Vec<HistoryEvent>,
}

/// Everything the poll loop can hand back.
#[derive(Debug, Clone)]
pub enum PolledTask {
    Workflow(WorkflowTask),
    Signal {
        workflow_id: String,
        name: String,
        payload: serde_json::Value,
    },
    Cancellation {
        workflow_id: String,
    },
}

/// Worker-side extension of the engine contract: task polling, completion
/// reporting, and activity recording.
#[async_trait]
pub trait WorkerGateway: Send + Sync {
    async fn poll_task(&self, task_queue: &str) -> Result<Option<PolledTask>>;
    async fn complete_task(
        &self,
        run_id: Uuid,
        status: WorkflowStatus,
        output: Option<serde_json::Value>,
        error: Option<UserFacingError>,
    ) -> Result<()>;
    async fn record_activity_result(
        &self,
        run_id: Uuid,
        invocation_id: &str,
        result: serde_json::Value,
    ) -> Result<()>;
    /// Returns `true` when the engine requests cancellation of the run.
    async fn record_activity_heartbeat(&self, run_id: Uuid, invocation_id: &str) -> Result<bool>;
}

/// How long a closed `RejectDuplicate` run keeps absorbing re-submissions
/// of the same workflow id (the event-sync dedup window).
pub const DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);
