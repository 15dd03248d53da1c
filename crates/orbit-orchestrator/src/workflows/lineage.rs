//! Lineage workflows: batch ingest plus the two scheduled maintenance
//! passes (five-minute aggregation, daily snapshots).

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use orbit_core::workflow::{OrbitWorkflow, WorkflowContext, WorkflowInfo};
use orbit_core::Result;

use crate::activities::lineage::{
    ActivityEvent, BatchStats, MaintenanceInput, MarkStats, ProcessBatchInput, SnapshotStats,
    StaleResetStats,
};

pub const PROCESSING_FAMILY: &str = "activity-processing";
pub const AGGREGATION_FAMILY: &str = "lineage-aggregation";
pub const MAINTENANCE_FAMILY: &str = "lineage-maintenance";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityBatchInput {
    pub batch_id: String,
    pub events: Vec<ActivityEvent>,
}

pub struct ActivityProcessingWorkflow;

impl OrbitWorkflow for ActivityProcessingWorkflow {
    type Input = ActivityBatchInput;
    type Output = BatchStats;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: PROCESSING_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            ctx.activity(
                "lineage.process_batch",
                ProcessBatchInput {
                    events: input.events,
                },
            )
            .run()
            .await
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceWorkflowInput {
    #[serde(default)]
    pub reference_time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationOutput {
    pub reset: u32,
    pub inactive: u32,
    pub archived: u32,
}

pub struct LineageAggregationWorkflow;

impl OrbitWorkflow for LineageAggregationWorkflow {
    type Input = MaintenanceWorkflowInput;
    type Output = AggregationOutput;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: AGGREGATION_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            let reset: StaleResetStats = ctx
                .activity(
                    "lineage.reset_stale",
                    MaintenanceInput {
                        reference_time: input.reference_time,
                    },
                )
                .run()
                .await?;
            let marks: MarkStats = ctx
                .activity(
                    "lineage.mark_inactive",
                    MaintenanceInput {
                        reference_time: input.reference_time,
                    },
                )
                .run()
                .await?;
            Ok(AggregationOutput {
                reset: reset.reset,
                inactive: marks.inactive,
                archived: marks.archived,
            })
        })
    }
}

pub struct ScheduledLineageMaintenanceWorkflow;

impl OrbitWorkflow for ScheduledLineageMaintenanceWorkflow {
    type Input = MaintenanceWorkflowInput;
    type Output = SnapshotStats;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: MAINTENANCE_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            ctx.activity(
                "lineage.create_snapshots",
                MaintenanceInput {
                    reference_time: input.reference_time,
                },
            )
            .run()
            .await
        })
    }
}
