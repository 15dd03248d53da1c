//! Hand-declared prost messages for the engine RPC surface.
//!
//! Only the contract in [`super::Engine`] and [`super::WorkerGateway`] is
//! modeled; structured payloads travel as JSON strings. Timestamps are unix
//! milliseconds, zero meaning unset.

/// Id-reuse policy wire values. Zero defers to the family default.
pub const ID_REUSE_UNSPECIFIED: i32 = 0;
pub const ID_REUSE_ALLOW_DUPLICATE: i32 = 1;
pub const ID_REUSE_REJECT_DUPLICATE: i32 = 2;

/// Task kind wire values.
pub const TASK_KIND_WORKFLOW: i32 = 1;
pub const TASK_KIND_SIGNAL: i32 = 2;
pub const TASK_KIND_CANCELLATION: i32 = 3;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartWorkflowRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub task_queue: String,
    #[prost(string, tag = "3")]
    pub workflow_id: String,
    #[prost(string, tag = "4")]
    pub family: String,
    #[prost(string, tag = "5")]
    pub input_json: String,
    #[prost(int32, tag = "6")]
    pub id_reuse_policy: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartWorkflowResponse {
    #[prost(string, tag = "1")]
    pub run_id: String,
    #[prost(bool, tag = "2")]
    pub already_running: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignalWorkflowRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub workflow_id: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub payload_json: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignalWorkflowResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryWorkflowRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub workflow_id: String,
    #[prost(string, tag = "3")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryWorkflowResponse {
    #[prost(string, tag = "1")]
    pub payload_json: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelWorkflowRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub workflow_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelWorkflowResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRunRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub workflow_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RunRecordMessage {
    #[prost(string, tag = "1")]
    pub run_id: String,
    #[prost(string, tag = "2")]
    pub workflow_id: String,
    #[prost(string, tag = "3")]
    pub family: String,
    #[prost(uint32, tag = "4")]
    pub attempt: u32,
    #[prost(string, tag = "5")]
    pub status: String,
    #[prost(string, tag = "6")]
    pub input_json: String,
    #[prost(string, tag = "7")]
    pub output_json: String,
    #[prost(string, tag = "8")]
    pub error_json: String,
    #[prost(int64, tag = "9")]
    pub started_at_ms: i64,
    #[prost(int64, tag = "10")]
    pub closed_at_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRunResponse {
    #[prost(message, optional, tag = "1")]
    pub run: Option<RunRecordMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetHistoryRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub run_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistoryEventMessage {
    #[prost(string, tag = "1")]
    pub invocation_id: String,
    #[prost(string, tag = "2")]
    pub result_json: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetHistoryResponse {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<HistoryEventMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateScheduleRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub spec_json: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateScheduleResponse {
    #[prost(string, tag = "1")]
    pub schedule_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetScheduleRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub schedule_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetScheduleResponse {
    #[prost(string, tag = "1")]
    pub spec_json: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollTaskRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub task_queue: String,
    #[prost(string, tag = "3")]
    pub identity: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PolledTaskMessage {
    #[prost(int32, tag = "1")]
    pub kind: i32,
    #[prost(string, tag = "2")]
    pub run_id: String,
    #[prost(string, tag = "3")]
    pub workflow_id: String,
    #[prost(string, tag = "4")]
    pub family: String,
    #[prost(string, tag = "5")]
    pub input_json: String,
    #[prost(uint32, tag = "6")]
    pub attempt: u32,
    #[prost(int64, tag = "7")]
    pub started_at_ms: i64,
    #[prost(message, repeated, tag = "8")]
    pub prior_events: Vec<HistoryEventMessage>,
    #[prost(string, tag = "9")]
    pub signal_name: String,
    #[prost(string, tag = "10")]
    pub signal_payload_json: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollTaskResponse {
    #[prost(message, optional, tag = "1")]
    pub task: Option<PolledTaskMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompleteTaskRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub run_id: String,
    #[prost(string, tag = "3")]
    pub status: String,
    #[prost(string, tag = "4")]
    pub output_json: String,
    #[prost(string, tag = "5")]
    pub error_json: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompleteTaskResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordActivityResultRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub run_id: String,
    #[prost(string, tag = "3")]
    pub invocation_id: String,
    #[prost(string, tag = "4")]
    pub result_json: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordActivityResultResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordActivityHeartbeatRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub run_id: String,
    #[prost(string, tag = "3")]
    pub invocation_id: String,
    #[prost(string, tag = "4")]
    pub identity: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordActivityHeartbeatResponse {
    #[prost(bool, tag = "1")]
    pub cancel_requested: bool,
}
