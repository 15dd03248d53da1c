//! Core abstractions for the orbit durable orchestration worker: the closed
//! error set, worker settings, retry policies, and the workflow/activity
//! capability surface. Engine plumbing lives in `orbit-runtime`; adapters in
//! `orbit-clients`; domain logic in `orbit-orchestrator`.

pub mod activity;
pub mod error;
pub mod retry;
pub mod schedule;
pub mod settings;
pub mod workflow;

pub use activity::{
    ActivityCall, ActivityContext, ActivityDispatcher, ActivityEntry, ActivityOptions,
    ActivityRegistry, BoxedActivityHandler, HeartbeatSink, NullHeartbeatSink,
};
pub use error::{ErrorKind, OrbitError, Result, UserFacingError};
pub use retry::RetryPolicy;
pub use schedule::ScheduleSpec;
pub use settings::WorkerSettings;
pub use workflow::{
    event_fingerprint, ChildLauncher, ChildSpec, ContextSeed, IdReusePolicy, OrbitWorkflow,
    Progress, QueryState, SignalHub, WorkflowContext, WorkflowId, WorkflowInfo, WorkflowStatus,
    PROGRESS_QUERY,
};
