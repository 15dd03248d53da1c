//! In-memory engine for workflow tests: inline execution, direct signal
//! and cancellation delivery, schedule triggering by hand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use orbit_core::activity::ActivityRegistry;
use orbit_core::workflow::{IdReusePolicy, WorkflowId, WorkflowStatus};
use orbit_core::{OrbitError, OrbitWorkflow, Result, ScheduleSpec, UserFacingError};

use crate::dispatcher::LocalActivityDispatcher;
use crate::engine::{
    Engine, HistoryEvent, PolledTask, RunRecord, StartOutcome, StartWorkflowOptions, WorkerGateway,
};
use crate::executor::ExecutionHost;
use crate::registry::WorkflowRegistry;
use crate::run_store::RunStore;

/// Gateway that records into the local run store; heartbeats carry no
/// engine-side cancellation (tokens propagate it directly in-process).
struct StoreGateway {
    store: Arc<RunStore>,
}

#[async_trait]
impl WorkerGateway for StoreGateway {
    async fn poll_task(&self, _task_queue: &str) -> Result<Option<PolledTask>> {
        Ok(None)
    }

    async fn complete_task(
        &self,
        _run_id: Uuid,
        _status: WorkflowStatus,
        _output: Option<serde_json::Value>,
        _error: Option<UserFacingError>,
    ) -> Result<()> {
        Ok(())
    }

    async fn record_activity_result(
        &self,
        run_id: Uuid,
        invocation_id: &str,
        result: serde_json::Value,
    ) -> Result<()> {
        self.store.record_activity(run_id, invocation_id, result);
        Ok(())
    }

    async fn record_activity_heartbeat(&self, _run_id: Uuid, _invocation_id: &str) -> Result<bool> {
        Ok(false)
    }
}

/// The workflow test harness: a full execution host over in-memory state.
pub struct TestEngine {
    host: Arc<ExecutionHost>,
    store: Arc<RunStore>,
    schedules: Mutex<HashMap<String, ScheduleSpec>>,
}

impl TestEngine {
    pub fn new(workflows: WorkflowRegistry, activities: ActivityRegistry) -> Self {
        let store = Arc::new(RunStore::new());
        let gateway: Arc<dyn WorkerGateway> = Arc::new(StoreGateway {
            store: store.clone(),
        });
        let dispatcher = Arc::new(LocalActivityDispatcher::new(
            Arc::new(activities),
            gateway,
            100,
        ));
        let host = ExecutionHost::new(Arc::new(workflows), dispatcher, store.clone());
        Self {
            host,
            store,
            schedules: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    /// Typed start.
    pub async fn start<W: OrbitWorkflow>(
        &self,
        workflow_id: WorkflowId,
        input: W::Input,
    ) -> Result<StartOutcome> {
        self.host
            .start(StartWorkflowOptions::new(
                workflow_id,
                W::info().family,
                serde_json::to_value(input)?,
            ))
            .await
    }

    /// Typed start, then wait for the terminal record.
    pub async fn run_to_end<W: OrbitWorkflow>(
        &self,
        workflow_id: WorkflowId,
        input: W::Input,
    ) -> Result<RunRecord> {
        let outcome = self.start::<W>(workflow_id, input).await?;
        Ok(self
            .store
            .await_closed(&outcome.handle().workflow_id)
            .await)
    }

    pub async fn await_closed(&self, workflow_id: &str) -> RunRecord {
        self.store.await_closed(workflow_id).await
    }

    /// Fire a registered schedule once, as the engine would.
    pub async fn trigger_schedule(&self, schedule_id: &str) -> Result<StartOutcome> {
        let spec = self
            .schedules
            .lock()
            .unwrap()
            .get(schedule_id)
            .cloned()
            .ok_or_else(|| OrbitError::not_found(format!("schedule {schedule_id}")))?;
        let mut opts =
            StartWorkflowOptions::new(spec.workflow_id.clone(), spec.family.clone(), spec.input);
        // Overlapping fires are skipped; closed runs do not block the next fire.
        opts.id_reuse = Some(IdReusePolicy::AllowDuplicate);
        self.host.start(opts).await
    }
}

/// Decode a completed run's output.
pub fn decode_output<T: DeserializeOwned>(record: &RunRecord) -> Result<T> {
    let output = record
        .output
        .clone()
        .ok_or_else(|| OrbitError::internal("run has no output"))?;
    serde_json::from_value(output)
        .map_err(|e| OrbitError::internal(format!("output undecodable: {e}")))
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    use orbit_core::workflow::{WorkflowContext, WorkflowInfo};
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize)]
    struct SagaInput {
        fail_after_reserve: bool,
    }

    /// Reserves a resource, registers a compensation, then optionally fails.
    struct Saga;

    impl OrbitWorkflow for Saga {
        type Input = SagaInput;
        type Output = String;

        fn info() -> WorkflowInfo {
            WorkflowInfo {
                family: "saga",
                ..WorkflowInfo::default()
            }
        }

        fn execute(
            ctx: &WorkflowContext,
            input: Self::Input,
        ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
            Box::pin(async move {
                let reserved: String = ctx.activity("reserve", ()).run().await?;
                ctx.compensate("release", serde_json::json!({ "what": reserved }))?;
                if input.fail_after_reserve {
                    return Err(OrbitError::transient("downstream exploded"));
                }
                Ok(reserved)
            })
        }
    }

    /// Blocks on a signal with a short timeout.
    struct WaitsForChoice;

    impl OrbitWorkflow for WaitsForChoice {
        type Input = ();
        type Output = Option<String>;

        fn info() -> WorkflowInfo {
            WorkflowInfo {
                family: "waits-for-choice",
                ..WorkflowInfo::default()
            }
        }

        fn execute(
            ctx: &WorkflowContext,
            _input: Self::Input,
        ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
            Box::pin(async move { ctx.wait_signal("choice", Duration::from_secs(5)).await })
        }
    }

    fn harness() -> (TestEngine, Arc<Mutex<Vec<String>>>) {
        let released = Arc::new(Mutex::new(Vec::new()));
        let mut workflows = WorkflowRegistry::new();
        workflows.register::<Saga>();
        workflows.register::<WaitsForChoice>();

        let mut activities = ActivityRegistry::new();
        activities.register("reserve", |_ctx, _input: serde_json::Value| async move {
            Ok("resource-7".to_string())
        });
        let log = released.clone();
        activities.register("release", move |_ctx, input: serde_json::Value| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(input["what"].as_str().unwrap_or("").to_string());
                Ok(())
            }
        });

        (TestEngine::new(workflows, activities), released)
    }

    #[tokio::test]
    async fn completed_saga_skips_compensation() {
        let (engine, released) = harness();
        let record = engine
            .run_to_end::<Saga>(
                WorkflowId::derive("saga", "s1"),
                SagaInput {
                    fail_after_reserve: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(record.status, WorkflowStatus::Completed);
        assert!(released.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_saga_compensates_in_detached_scope() {
        let (engine, released) = harness();
        let record = engine
            .run_to_end::<Saga>(
                WorkflowId::derive("saga", "s2"),
                SagaInput {
                    fail_after_reserve: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(record.status, WorkflowStatus::Failed);
        assert_eq!(released.lock().unwrap().as_slice(), ["resource-7"]);
        let error = record.error.unwrap();
        assert_eq!(error.kind, "TRANSIENT");
    }

    #[tokio::test]
    async fn second_start_returns_existing_run() {
        let (engine, _) = harness();
        let first = engine
            .start::<WaitsForChoice>(WorkflowId::derive("waits-for-choice", "w1"), ())
            .await
            .unwrap();
        let second = engine
            .start::<WaitsForChoice>(WorkflowId::derive("waits-for-choice", "w1"), ())
            .await
            .unwrap();

        assert!(first.started_new_run());
        assert!(!second.started_new_run());
        assert_eq!(first.handle().run_id, second.handle().run_id);

        engine
            .signal_workflow("waits-for-choice:w1", "choice", serde_json::json!("a"))
            .await
            .unwrap();
        let record = engine.await_closed("waits-for-choice:w1").await;
        assert_eq!(record.status, WorkflowStatus::Completed);
        assert_eq!(decode_output::<Option<String>>(&record).unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn cancellation_runs_compensations() {
        let (engine, _) = harness();
        engine
            .start::<WaitsForChoice>(WorkflowId::derive("waits-for-choice", "w2"), ())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.cancel_workflow("waits-for-choice:w2").await.unwrap();

        let record = engine.await_closed("waits-for-choice:w2").await;
        assert_eq!(record.status, WorkflowStatus::Cancelled);
    }
}

#[async_trait]
impl Engine for TestEngine {
    async fn start_workflow(&self, opts: StartWorkflowOptions) -> Result<StartOutcome> {
        self.host.start(opts).await
    }

    async fn signal_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.store.deliver_signal(workflow_id, name, payload)
    }

    async fn query_workflow(&self, workflow_id: &str, name: &str) -> Result<serde_json::Value> {
        self.store.query(workflow_id, name)
    }

    async fn cancel_workflow(&self, workflow_id: &str) -> Result<()> {
        self.store.request_cancel(workflow_id)
    }

    async fn get_run(&self, workflow_id: &str) -> Result<RunRecord> {
        self.store.get_record(workflow_id)
    }

    async fn get_history(&self, run_id: Uuid) -> Result<Vec<HistoryEvent>> {
        Ok(self.store.history(run_id))
    }

    async fn create_schedule(&self, spec: ScheduleSpec) -> Result<String> {
        spec.validate()?;
        let id = spec.id.clone();
        self.schedules.lock().unwrap().insert(id.clone(), spec);
        Ok(id)
    }

    async fn get_schedule(&self, schedule_id: &str) -> Result<ScheduleSpec> {
        self.schedules
            .lock()
            .unwrap()
            .get(schedule_id)
            .cloned()
            .ok_or_else(|| OrbitError::not_found(format!("schedule {schedule_id}")))
    }
}
