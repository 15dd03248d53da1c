use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use super::context::WorkflowContext;
use super::id::IdReusePolicy;
use crate::Result;

/// Trait implemented by every workflow family.
///
/// A workflow is a deterministic function of its input and its recorded
/// history: all side effects, clock reads, and randomness go through the
/// [`WorkflowContext`].
pub trait OrbitWorkflow: Send + Sync + 'static {
    type Input: DeserializeOwned + Serialize + Send + Sync;
    type Output: Serialize + DeserializeOwned + Send;

    fn info() -> WorkflowInfo;

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>>;
}

/// Workflow family metadata, registered in the table the worker walks.
#[derive(Debug, Clone)]
pub struct WorkflowInfo {
    pub family: &'static str,
    pub version: u32,
    pub execution_timeout: Duration,
    pub id_reuse: IdReusePolicy,
}

impl Default for WorkflowInfo {
    fn default() -> Self {
        Self {
            family: "",
            version: 1,
            execution_timeout: Duration::from_secs(24 * 3600),
            id_reuse: IdReusePolicy::RejectDuplicate,
        }
    }
}

/// Run status as surfaced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut)
    }
}

impl FromStr for WorkflowStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "timed_out" => Self::TimedOut,
            _ => Self::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_defaults() {
        let info = WorkflowInfo::default();
        assert_eq!(info.version, 1);
        assert_eq!(info.execution_timeout, Duration::from_secs(86400));
        assert_eq!(info.id_reuse, IdReusePolicy::RejectDuplicate);
    }

    #[test]
    fn status_round_trip() {
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
            WorkflowStatus::TimedOut,
        ] {
            assert_eq!(status.as_str().parse::<WorkflowStatus>(), Ok(status));
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(WorkflowStatus::TimedOut.is_terminal());
    }
}
