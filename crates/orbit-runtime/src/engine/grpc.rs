use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use uuid::Uuid;

use orbit_core::workflow::{IdReusePolicy, WorkflowStatus};
use orbit_core::{OrbitError, Result, ScheduleSpec, UserFacingError};

use super::proto;
use super::{
    Engine, HistoryEvent, PolledTask, RunHandle, RunRecord, StartOutcome, StartWorkflowOptions,
    WorkerGateway, WorkflowTask,
};

/// Engine client over tonic.
///
/// The message schema is this worker's own (wire-protocol fidelity to a
/// specific engine is a non-goal); everything behind [`Engine`] and
/// [`WorkerGateway`] goes through here in production.
pub struct GrpcEngine {
    channel: Channel,
    namespace: String,
    task_queue: String,
    identity: String,
}

impl GrpcEngine {
    /// Connect to the engine. Failure here maps to worker exit code 2.
    pub async fn connect(
        address: &str,
        namespace: &str,
        task_queue: &str,
        identity: &str,
    ) -> Result<Self> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| OrbitError::config(format!("bad engine address {address:?}: {e}")))?
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Some(Duration::from_secs(30)));
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| OrbitError::transient(format!("engine connect failed: {e}")))?;

        Ok(Self {
            channel,
            namespace: namespace.to_string(),
            task_queue: task_queue.to_string(),
            identity: identity.to_string(),
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| OrbitError::transient(format!("engine unavailable: {e}")))?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await
            .map_err(map_status)?;
        Ok(response.into_inner())
    }
}

fn map_status(status: tonic::Status) -> OrbitError {
    use tonic::Code;
    let message = format!("engine rpc failed: {}", status.message());
    match status.code() {
        Code::NotFound => OrbitError::not_found(message),
        Code::AlreadyExists => OrbitError::conflict(message),
        Code::PermissionDenied | Code::Unauthenticated => OrbitError::permission_denied(message),
        Code::InvalidArgument | Code::FailedPrecondition => OrbitError::validation(message),
        Code::ResourceExhausted => OrbitError::rate_limited(None, message),
        Code::DeadlineExceeded => OrbitError::timeout(message),
        Code::Cancelled => OrbitError::cancelled(message),
        _ => OrbitError::transient(message),
    }
}

fn encode_json(value: &serde_json::Value) -> String {
    value.to_string()
}

fn decode_json(raw: &str) -> Result<serde_json::Value> {
    if raw.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(raw)
        .map_err(|e| OrbitError::internal(format!("engine sent invalid json: {e}")))
}

fn decode_optional_json(raw: &str) -> Result<Option<serde_json::Value>> {
    if raw.is_empty() {
        return Ok(None);
    }
    decode_json(raw).map(Some)
}

fn decode_error(raw: &str) -> Result<Option<UserFacingError>> {
    if raw.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|e| OrbitError::internal(format!("engine sent invalid error record: {e}")))
}

fn decode_run_id(raw: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|e| OrbitError::internal(format!("engine sent invalid run id {raw:?}: {e}")))
}

fn decode_timestamp(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| OrbitError::internal(format!("engine sent invalid timestamp {ms}")))
}

fn decode_record(msg: proto::RunRecordMessage) -> Result<RunRecord> {
    let status: WorkflowStatus = msg.status.parse().unwrap_or(WorkflowStatus::Pending);
    Ok(RunRecord {
        run_id: decode_run_id(&msg.run_id)?,
        workflow_id: msg.workflow_id,
        family: msg.family,
        attempt: msg.attempt,
        status,
        input: decode_json(&msg.input_json)?,
        output: decode_optional_json(&msg.output_json)?,
        error: decode_error(&msg.error_json)?,
        started_at: decode_timestamp(msg.started_at_ms)?,
        closed_at: if msg.closed_at_ms == 0 {
            None
        } else {
            Some(decode_timestamp(msg.closed_at_ms)?)
        },
    })
}

fn decode_events(events: Vec<proto::HistoryEventMessage>) -> Result<Vec<HistoryEvent>> {
    events
        .into_iter()
        .map(|e| {
            Ok(HistoryEvent {
                invocation_id: e.invocation_id,
                result: decode_json(&e.result_json)?,
            })
        })
        .collect()
}

#[async_trait]
impl Engine for GrpcEngine {
    async fn start_workflow(&self, opts: StartWorkflowOptions) -> Result<StartOutcome> {
        let id_reuse_policy = match opts.id_reuse {
            None => proto::ID_REUSE_UNSPECIFIED,
            Some(IdReusePolicy::AllowDuplicate) => proto::ID_REUSE_ALLOW_DUPLICATE,
            Some(IdReusePolicy::RejectDuplicate) => proto::ID_REUSE_REJECT_DUPLICATE,
        };
        let workflow_id = opts.workflow_id.as_str().to_string();
        let response: proto::StartWorkflowResponse = self
            .unary(
                "/orbit.engine.v1.EngineService/StartWorkflow",
                proto::StartWorkflowRequest {
                    namespace: self.namespace.clone(),
                    task_queue: self.task_queue.clone(),
                    workflow_id: workflow_id.clone(),
                    family: opts.family,
                    input_json: encode_json(&opts.input),
                    id_reuse_policy,
                },
            )
            .await?;

        let handle = RunHandle {
            run_id: decode_run_id(&response.run_id)?,
            workflow_id,
        };
        Ok(if response.already_running {
            StartOutcome::AlreadyRunning(handle)
        } else {
            StartOutcome::Started(handle)
        })
    }

    async fn signal_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let _: proto::SignalWorkflowResponse = self
            .unary(
                "/orbit.engine.v1.EngineService/SignalWorkflow",
                proto::SignalWorkflowRequest {
                    namespace: self.namespace.clone(),
                    workflow_id: workflow_id.to_string(),
                    name: name.to_string(),
                    payload_json: encode_json(&payload),
                },
            )
            .await?;
        Ok(())
    }

    async fn query_workflow(&self, workflow_id: &str, name: &str) -> Result<serde_json::Value> {
        let response: proto::QueryWorkflowResponse = self
            .unary(
                "/orbit.engine.v1.EngineService/QueryWorkflow",
                proto::QueryWorkflowRequest {
                    namespace: self.namespace.clone(),
                    workflow_id: workflow_id.to_string(),
                    name: name.to_string(),
                },
            )
            .await?;
        decode_json(&response.payload_json)
    }

    async fn cancel_workflow(&self, workflow_id: &str) -> Result<()> {
        let _: proto::CancelWorkflowResponse = self
            .unary(
                "/orbit.engine.v1.EngineService/CancelWorkflow",
                proto::CancelWorkflowRequest {
                    namespace: self.namespace.clone(),
                    workflow_id: workflow_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn get_run(&self, workflow_id: &str) -> Result<RunRecord> {
        let response: proto::GetRunResponse = self
            .unary(
                "/orbit.engine.v1.EngineService/GetRun",
                proto::GetRunRequest {
                    namespace: self.namespace.clone(),
                    workflow_id: workflow_id.to_string(),
                },
            )
            .await?;
        let msg = response
            .run
            .ok_or_else(|| OrbitError::not_found(format!("run {workflow_id} not found")))?;
        decode_record(msg)
    }

    async fn get_history(&self, run_id: Uuid) -> Result<Vec<HistoryEvent>> {
        let response: proto::GetHistoryResponse = self
            .unary(
                "/orbit.engine.v1.EngineService/GetHistory",
                proto::GetHistoryRequest {
                    namespace: self.namespace.clone(),
                    run_id: run_id.to_string(),
                },
            )
            .await?;
        decode_events(response.events)
    }

    async fn create_schedule(&self, spec: ScheduleSpec) -> Result<String> {
        spec.validate()?;
        let response: proto::CreateScheduleResponse = self
            .unary(
                "/orbit.engine.v1.EngineService/CreateSchedule",
                proto::CreateScheduleRequest {
                    namespace: self.namespace.clone(),
                    spec_json: serde_json::to_string(&spec)?,
                },
            )
            .await?;
        Ok(response.schedule_id)
    }

    async fn get_schedule(&self, schedule_id: &str) -> Result<ScheduleSpec> {
        let response: proto::GetScheduleResponse = self
            .unary(
                "/orbit.engine.v1.EngineService/GetSchedule",
                proto::GetScheduleRequest {
                    namespace: self.namespace.clone(),
                    schedule_id: schedule_id.to_string(),
                },
            )
            .await?;
        serde_json::from_str(&response.spec_json)
            .map_err(|e| OrbitError::internal(format!("engine sent invalid schedule: {e}")))
    }
}

#[async_trait]
impl WorkerGateway for GrpcEngine {
    async fn poll_task(&self, task_queue: &str) -> Result<Option<PolledTask>> {
        let response: proto::PollTaskResponse = self
            .unary(
                "/orbit.engine.v1.EngineService/PollTask",
                proto::PollTaskRequest {
                    namespace: self.namespace.clone(),
                    task_queue: task_queue.to_string(),
                    identity: self.identity.clone(),
                },
            )
            .await?;

        let Some(msg) = response.task else {
            return Ok(None);
        };

        let polled = match msg.kind {
            proto::TASK_KIND_WORKFLOW => PolledTask::Workflow(WorkflowTask {
                run_id: decode_run_id(&msg.run_id)?,
                workflow_id: msg.workflow_id,
                family: msg.family,
                input: decode_json(&msg.input_json)?,
                attempt: msg.attempt.max(1),
                started_at: decode_timestamp(msg.started_at_ms)?,
                prior_events: decode_events(msg.prior_events)?,
            }),
            proto::TASK_KIND_SIGNAL => PolledTask::Signal {
                workflow_id: msg.workflow_id,
                name: msg.signal_name,
                payload: decode_json(&msg.signal_payload_json)?,
            },
            proto::TASK_KIND_CANCELLATION => PolledTask::Cancellation {
                workflow_id: msg.workflow_id,
            },
            other => {
                return Err(OrbitError::internal(format!(
                    "engine sent unknown task kind {other}"
                )))
            }
        };
        Ok(Some(polled))
    }

    async fn complete_task(
        &self,
        run_id: Uuid,
        status: WorkflowStatus,
        output: Option<serde_json::Value>,
        error: Option<UserFacingError>,
    ) -> Result<()> {
        let _: proto::CompleteTaskResponse = self
            .unary(
                "/orbit.engine.v1.EngineService/CompleteTask",
                proto::CompleteTaskRequest {
                    namespace: self.namespace.clone(),
                    run_id: run_id.to_string(),
                    status: status.as_str().to_string(),
                    output_json: output.map(|v| v.to_string()).unwrap_or_default(),
                    error_json: error
                        .map(|e| serde_json::to_string(&e).unwrap_or_default())
                        .unwrap_or_default(),
                },
            )
            .await?;
        Ok(())
    }

    async fn record_activity_result(
        &self,
        run_id: Uuid,
        invocation_id: &str,
        result: serde_json::Value,
    ) -> Result<()> {
        let _: proto::RecordActivityResultResponse = self
            .unary(
                "/orbit.engine.v1.EngineService/RecordActivityResult",
                proto::RecordActivityResultRequest {
                    namespace: self.namespace.clone(),
                    run_id: run_id.to_string(),
                    invocation_id: invocation_id.to_string(),
                    result_json: result.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn record_activity_heartbeat(&self, run_id: Uuid, invocation_id: &str) -> Result<bool> {
        let response: proto::RecordActivityHeartbeatResponse = self
            .unary(
                "/orbit.engine.v1.EngineService/RecordActivityHeartbeat",
                proto::RecordActivityHeartbeatRequest {
                    namespace: self.namespace.clone(),
                    run_id: run_id.to_string(),
                    invocation_id: invocation_id.to_string(),
                    identity: self.identity.clone(),
                },
            )
            .await?;
        Ok(response.cancel_requested)
    }
}
