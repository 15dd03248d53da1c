mod context;
mod id;
mod progress;
mod signal;
mod traits;

pub use context::{
    ActivityInvocation, ChildLauncher, ChildSpec, ContextSeed, DeferredCall, QueryState,
    WorkflowContext,
};
pub use id::{event_fingerprint, IdReusePolicy, WorkflowId};
pub use progress::{Progress, PROGRESS_QUERY};
pub use signal::SignalHub;
pub use traits::{OrbitWorkflow, WorkflowInfo, WorkflowStatus};
