//! Scheduled per-app health check: probe, then record.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use orbit_core::workflow::{OrbitWorkflow, WorkflowContext, WorkflowInfo};
use orbit_core::Result;

use crate::activities::health::{HealthReport, ProbeInput};

pub const FAMILY: &str = "health-check";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckInput {
    pub app_id: String,
}

pub struct HealthCheckWorkflow;

impl OrbitWorkflow for HealthCheckWorkflow {
    type Input = HealthCheckInput;
    type Output = HealthReport;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            let report: HealthReport = ctx
                .activity(
                    "health.probe",
                    ProbeInput {
                        app_id: input.app_id,
                    },
                )
                .run()
                .await?;
            ctx.activity("health.record", report.clone())
                .run::<()>()
                .await?;
            Ok(report)
        })
    }
}
