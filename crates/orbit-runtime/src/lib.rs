//! Engine adapter for the orbit worker: the engine contract and its gRPC
//! client, the in-memory run store, the workflow executor, the activity
//! dispatcher, the poll loop, and the schedule registrar.

pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod registry;
pub mod run_store;
pub mod schedules;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use dispatcher::LocalActivityDispatcher;
pub use engine::{
    Engine, GrpcEngine, HistoryEvent, PolledTask, RunHandle, RunRecord, StartOutcome,
    StartWorkflowOptions, WorkerGateway, WorkflowTask, DEDUP_WINDOW,
};
pub use executor::ExecutionHost;
pub use registry::{BoxedWorkflowHandler, WorkflowEntry, WorkflowRegistry};
pub use run_store::{ActiveRun, BeginOutcome, RunStore};
pub use schedules::ScheduleRegistry;
pub use worker::{Worker, WorkerConfig};
