//! Decommissioning: stop writes, revoke best-effort, archive, mark, and
//! hand off to the delayed cleanup run. The cleanup's grace-window timer
//! is cancellable; cancellation reverts the app and leaves the archive.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orbit_clients::ArchiveRef;
use orbit_core::workflow::{OrbitWorkflow, WorkflowContext, WorkflowId, WorkflowInfo};
use orbit_core::{ErrorKind, Result};

use crate::activities::decommission::{
    AppInput, CleanupStats, MarkDeletedInput, RevokeStats,
};
use crate::records::ApplicationRecord;

pub const DECOMMISSION_FAMILY: &str = "app-decommission";
pub const CLEANUP_FAMILY: &str = "app-cleanup";

const GRACE_SECONDS: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecommissionInput {
    pub app_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecommissionOutput {
    pub archive: ArchiveRef,
    pub cleanup_workflow_id: String,
    pub cleanup_at: DateTime<Utc>,
    pub credentials_revoked: u32,
    pub credentials_failed: u32,
}

pub struct ApplicationDecommissioningWorkflow;

impl OrbitWorkflow for ApplicationDecommissioningWorkflow {
    type Input = DecommissionInput;
    type Output = DecommissionOutput;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: DECOMMISSION_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            let app_input = AppInput {
                app_id: input.app_id.clone(),
            };

            let _app: ApplicationRecord = ctx
                .activity("decommission.check_status", app_input.clone())
                .no_retry()
                .run()
                .await?;

            let _read_only: u32 = ctx
                .activity("decommission.set_read_only", app_input.clone())
                .run()
                .await?;

            let revoked: RevokeStats = ctx
                .activity("decommission.revoke_credentials", app_input.clone())
                .run()
                .await?;

            let archive: ArchiveRef = ctx
                .activity("decommission.archive_metrics", app_input.clone())
                .run()
                .await?;

            let cleanup_at = ctx.start_time() + chrono::Duration::seconds(GRACE_SECONDS as i64);
            ctx.activity(
                "decommission.mark_deleted",
                MarkDeletedInput {
                    app_id: input.app_id.clone(),
                    cleanup_at,
                },
            )
            .run::<()>()
            .await?;

            let cleanup_workflow_id = WorkflowId::derive(CLEANUP_FAMILY, &input.app_id);
            ctx.start_workflow::<ApplicationCleanupWorkflow>(
                cleanup_workflow_id.clone(),
                CleanupInput {
                    app_id: input.app_id.clone(),
                    grace_seconds: GRACE_SECONDS,
                },
            )
            .await?;

            Ok(DecommissionOutput {
                archive,
                cleanup_workflow_id: cleanup_workflow_id.into_string(),
                cleanup_at,
                credentials_revoked: revoked.revoked,
                credentials_failed: revoked.failed,
            })
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupInput {
    pub app_id: String,
    #[serde(default = "default_grace")]
    pub grace_seconds: u64,
}

fn default_grace() -> u64 {
    GRACE_SECONDS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupOutput {
    pub topics_deleted: u32,
    pub clusters_deleted: u32,
    pub stats: CleanupStats,
}

pub struct ApplicationCleanupWorkflow;

impl OrbitWorkflow for ApplicationCleanupWorkflow {
    type Input = CleanupInput;
    type Output = CleanupOutput;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: CLEANUP_FAMILY,
            // Covers the seven-day grace window plus retries.
            execution_timeout: Duration::from_secs(14 * 24 * 3600),
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            let app_input = AppInput {
                app_id: input.app_id.clone(),
            };

            match ctx.sleep(Duration::from_secs(input.grace_seconds)).await {
                Ok(()) => {}
                Err(e) if e.kind == ErrorKind::Cancelled => {
                    // Cancelled inside the grace window: put the app back
                    // and keep the archive.
                    if let Err(revert_err) = ctx
                        .activity("decommission.revert_status", app_input.clone())
                        .detached()
                        .run::<()>()
                        .await
                    {
                        tracing::error!(
                            app_id = %input.app_id,
                            error = %revert_err,
                            "status revert failed after cleanup cancellation"
                        );
                    }
                    return Err(e);
                }
                Err(e) => return Err(e),
            }

            let topics_deleted: u32 = ctx
                .activity("decommission.delete_physical_topics", app_input.clone())
                .run()
                .await?;
            let clusters_deleted: u32 = ctx
                .activity("decommission.delete_virtual_clusters", app_input.clone())
                .run()
                .await?;
            let stats: CleanupStats = ctx
                .activity("decommission.execute_cleanup", app_input.clone())
                .run()
                .await?;

            Ok(CleanupOutput {
                topics_deleted,
                clusters_deleted,
                stats,
            })
        })
    }
}
