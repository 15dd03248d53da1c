//! Access-share provisioning and revocation, serialized per share.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use orbit_core::workflow::{OrbitWorkflow, WorkflowContext, WorkflowInfo};
use orbit_core::Result;

use crate::activities::access::{LoadShareInput, ShareActionInput, UpdateShareStatusInput};
use crate::records::ShareRecord;

pub const PROVISIONING_FAMILY: &str = "access-provisioning";
pub const REVOCATION_FAMILY: &str = "access-revocation";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessInput {
    pub share_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessOutput {
    pub share_id: String,
    pub status: String,
}

async fn run_share_action(
    ctx: &WorkflowContext,
    share_id: String,
    action: &'static str,
    final_status: &'static str,
) -> Result<AccessOutput> {
    let record: ShareRecord = ctx
        .activity(
            "access.load",
            LoadShareInput {
                share_id: share_id.clone(),
            },
        )
        .run()
        .await?;
    ctx.activity(action, ShareActionInput { record })
        .run::<()>()
        .await?;
    ctx.activity(
        "access.update_status",
        UpdateShareStatusInput {
            share_id: share_id.clone(),
            status: final_status.to_string(),
        },
    )
    .run::<()>()
    .await?;
    Ok(AccessOutput {
        share_id,
        status: final_status.to_string(),
    })
}

pub struct AccessProvisioningWorkflow;

impl OrbitWorkflow for AccessProvisioningWorkflow {
    type Input = AccessInput;
    type Output = AccessOutput;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: PROVISIONING_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(run_share_action(
            ctx,
            input.share_id,
            "access.provision",
            "active",
        ))
    }
}

pub struct AccessRevocationWorkflow;

impl OrbitWorkflow for AccessRevocationWorkflow {
    type Input = AccessInput;
    type Output = AccessOutput;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: REVOCATION_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(run_share_action(
            ctx,
            input.share_id,
            "access.revoke",
            "revoked",
        ))
    }
}
