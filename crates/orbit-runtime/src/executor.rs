use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use orbit_core::activity::{ActivityCall, ActivityDispatcher, ActivityOptions};
use orbit_core::workflow::{
    ChildLauncher, ChildSpec, ContextSeed, WorkflowContext, WorkflowStatus,
};
use orbit_core::{ErrorKind, OrbitError, Result};

use crate::engine::{
    RunHandle, RunRecord, StartOutcome, StartWorkflowOptions, WorkflowTask, DEDUP_WINDOW,
};
use crate::registry::WorkflowRegistry;
use crate::run_store::{ActiveRun, BeginOutcome, RunStore};

/// Executes registered workflow families against the local run store.
///
/// Children run inline through the same host (it is the
/// [`ChildLauncher`] contexts see), so parent cancellation, id uniqueness,
/// and replay behave identically for top-level and child runs.
pub struct ExecutionHost {
    me: Weak<ExecutionHost>,
    workflows: Arc<WorkflowRegistry>,
    dispatcher: Arc<dyn ActivityDispatcher>,
    store: Arc<RunStore>,
    dedup_window: Duration,
}

impl ExecutionHost {
    pub fn new(
        workflows: Arc<WorkflowRegistry>,
        dispatcher: Arc<dyn ActivityDispatcher>,
        store: Arc<RunStore>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            workflows,
            dispatcher,
            store,
            dedup_window: DEDUP_WINDOW,
        })
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    pub fn workflows(&self) -> &Arc<WorkflowRegistry> {
        &self.workflows
    }

    fn strong(&self) -> Result<Arc<ExecutionHost>> {
        self.me
            .upgrade()
            .ok_or_else(|| OrbitError::internal("execution host dropped"))
    }

    /// Start a run in the background, honoring the family's id-reuse
    /// policy. Used for locally triggered starts (tests, detached starts).
    pub async fn start(&self, opts: StartWorkflowOptions) -> Result<StartOutcome> {
        let entry = self
            .workflows
            .get(&opts.family)
            .ok_or_else(|| OrbitError::not_found(format!("workflow family {}", opts.family)))?;
        let reject = matches!(
            opts.id_reuse.unwrap_or(entry.info.id_reuse),
            orbit_core::IdReusePolicy::RejectDuplicate
        );
        let timeout = entry.info.execution_timeout;
        let workflow_id = opts.workflow_id.as_str().to_string();

        match self.store.begin(
            &workflow_id,
            &opts.family,
            opts.input,
            1,
            reject,
            self.dedup_window,
            None,
            CancellationToken::new(),
        ) {
            BeginOutcome::Existing { run_id } => Ok(StartOutcome::AlreadyRunning(RunHandle {
                run_id,
                workflow_id,
            })),
            BeginOutcome::New(run) => {
                let handle = RunHandle {
                    run_id: run.run_id,
                    workflow_id,
                };
                let host = self.strong()?;
                tokio::spawn(async move {
                    host.drive(run, timeout).await;
                });
                Ok(StartOutcome::Started(handle))
            }
        }
    }

    /// Execute a task the engine dispatched to this worker, to completion.
    pub async fn execute_polled(&self, task: WorkflowTask) -> Result<RunRecord> {
        for event in &task.prior_events {
            self.store
                .record_activity(task.run_id, &event.invocation_id, event.result.clone());
        }
        let timeout = self
            .workflows
            .get(&task.family)
            .map(|e| e.info.execution_timeout)
            .unwrap_or(Duration::from_secs(24 * 3600));

        match self.store.begin(
            &task.workflow_id,
            &task.family,
            task.input,
            task.attempt,
            true,
            self.dedup_window,
            Some(task.run_id),
            CancellationToken::new(),
        ) {
            BeginOutcome::Existing { .. } => Ok(self.store.await_closed(&task.workflow_id).await),
            BeginOutcome::New(run) => Ok(self.drive(run, timeout).await),
        }
    }

    async fn drive(&self, run: Arc<ActiveRun>, timeout: Duration) -> RunRecord {
        let span = tracing::info_span!(
            "workflow",
            workflow_id = %run.workflow_id,
            run_id = %run.run_id,
            family = %run.family
        );
        self.drive_inner(run, timeout).instrument(span).await
    }

    async fn drive_inner(&self, run: Arc<ActiveRun>, timeout: Duration) -> RunRecord {
        let workflow_id = run.workflow_id.clone();

        let Some(entry) = self.workflows.get(&run.family) else {
            let err = OrbitError::internal(format!("workflow family {} not registered", run.family));
            self.store
                .finish(&workflow_id, WorkflowStatus::Failed, None, Some(err.user_facing()));
            return self
                .store
                .get_record(&workflow_id)
                .unwrap_or_else(|_| missing_record(&run));
        };

        let prior_results: HashMap<String, serde_json::Value> = self
            .store
            .history(run.run_id)
            .into_iter()
            .map(|e| (e.invocation_id, e.result))
            .collect();

        let launcher = match self.strong() {
            Ok(host) => host as Arc<dyn ChildLauncher>,
            Err(e) => {
                self.store
                    .finish(&workflow_id, WorkflowStatus::Failed, None, Some(e.user_facing()));
                return self
                    .store
                    .get_record(&workflow_id)
                    .unwrap_or_else(|_| missing_record(&run));
            }
        };

        let ctx = WorkflowContext::new(ContextSeed {
            run_id: run.run_id,
            workflow_id: workflow_id.clone(),
            family: run.family.clone(),
            attempt: run.attempt,
            started_at: run.started_at,
            dispatcher: self.dispatcher.clone(),
            children: launcher,
            signals: run.signals.clone(),
            queries: run.queries.clone(),
            cancellation: run.cancellation.clone(),
            prior_results,
        });

        let handler = entry.handler.clone();
        let outcome = tokio::time::timeout(timeout, handler(&ctx, run.input.clone())).await;

        let (status, output, error) = match outcome {
            Ok(Ok(output)) => {
                self.run_deferred(&ctx, &run, false).await;
                tracing::info!(status = "completed", "workflow finished");
                (WorkflowStatus::Completed, Some(output), None)
            }
            Ok(Err(e)) if e.kind == ErrorKind::Cancelled => {
                self.run_deferred(&ctx, &run, true).await;
                tracing::info!(status = "cancelled", "workflow finished");
                (WorkflowStatus::Cancelled, None, Some(correlated(e, &run)))
            }
            Ok(Err(e)) => {
                self.run_deferred(&ctx, &run, true).await;
                tracing::warn!(
                    status = "failed",
                    kind = e.kind.as_str(),
                    code = e.code_str(),
                    "workflow finished"
                );
                (WorkflowStatus::Failed, None, Some(correlated(e, &run)))
            }
            Err(_) => {
                self.run_deferred(&ctx, &run, true).await;
                let e = OrbitError::timeout(format!(
                    "workflow exceeded execution timeout of {timeout:?}"
                ));
                tracing::warn!(status = "timed_out", "workflow finished");
                (WorkflowStatus::TimedOut, None, Some(correlated(e, &run)))
            }
        };

        self.store.finish(&workflow_id, status, output, error);
        self.store
            .get_record(&workflow_id)
            .unwrap_or_else(|_| missing_record(&run))
    }

    /// Run registered compensations (on failure or cancellation) and
    /// finalizers (always) in a detached scope. Failures are logged, never
    /// propagated.
    async fn run_deferred(&self, ctx: &WorkflowContext, run: &ActiveRun, compensate: bool) {
        let mut calls = Vec::new();
        if compensate {
            calls.extend(ctx.take_compensations());
        }
        calls.extend(ctx.take_finalizers());

        for (index, call) in calls.into_iter().enumerate() {
            let activity_call = ActivityCall {
                name: call.activity.clone(),
                input: call.input,
                options: ActivityOptions {
                    detached: true,
                    ..ActivityOptions::default()
                },
                invocation_id: format!("deferred:{}#{index}", call.activity),
                workflow_id: run.workflow_id.clone(),
                run_id: run.run_id,
                cancellation: CancellationToken::new(),
            };
            if let Err(e) = self.dispatcher.dispatch(activity_call).await {
                tracing::error!(
                    activity = %call.activity,
                    error = %e,
                    "deferred activity failed"
                );
            }
        }
    }
}

fn correlated(e: OrbitError, run: &ActiveRun) -> orbit_core::UserFacingError {
    let e = if e.correlation_id.is_none() {
        e.with_correlation(run.run_id.to_string())
    } else {
        e
    };
    e.user_facing()
}

fn missing_record(run: &ActiveRun) -> RunRecord {
    RunRecord {
        run_id: run.run_id,
        workflow_id: run.workflow_id.clone(),
        family: run.family.clone(),
        attempt: run.attempt,
        status: WorkflowStatus::Failed,
        input: run.input.clone(),
        output: None,
        error: None,
        started_at: run.started_at,
        closed_at: None,
    }
}

#[async_trait]
impl ChildLauncher for ExecutionHost {
    async fn launch(&self, spec: ChildSpec) -> Result<serde_json::Value> {
        let entry = self
            .workflows
            .get(spec.family)
            .ok_or_else(|| OrbitError::not_found(format!("workflow family {}", spec.family)))?;
        let reject = matches!(
            entry.info.id_reuse,
            orbit_core::IdReusePolicy::RejectDuplicate
        );
        let timeout = entry.info.execution_timeout;
        let workflow_id = spec.workflow_id.as_str().to_string();

        let record = match self.store.begin(
            &workflow_id,
            spec.family,
            spec.input,
            1,
            reject,
            self.dedup_window,
            None,
            spec.parent_cancellation.child_token(),
        ) {
            BeginOutcome::Existing { .. } => self.store.await_closed(&workflow_id).await,
            BeginOutcome::New(run) => self.drive(run, timeout).await,
        };

        match record.status {
            WorkflowStatus::Completed => Ok(record.output.unwrap_or(serde_json::Value::Null)),
            _ => {
                let err = record
                    .error
                    .map(|e| e.to_error())
                    .unwrap_or_else(|| OrbitError::internal("child run closed without error"));
                Err(err)
            }
        }
    }

    async fn start_detached(&self, spec: ChildSpec) -> Result<()> {
        self.start(StartWorkflowOptions::new(
            spec.workflow_id,
            spec.family,
            spec.input,
        ))
        .await
        .map(|_| ())
    }
}
