//! Credential sync: upsert and revoke mirror each other, serialized per
//! credential by workflow id.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use orbit_core::workflow::{OrbitWorkflow, WorkflowContext, WorkflowInfo};
use orbit_core::Result;

use crate::activities::credential::{
    LoadCredentialInput, SyncCredentialInput, UpdateCredentialStatusInput,
};
use crate::records::CredentialRecord;

pub const UPSERT_FAMILY: &str = "credential-upsert";
pub const REVOKE_FAMILY: &str = "credential-revoke";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialInput {
    pub cred_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialOutput {
    pub cred_id: String,
    pub status: String,
}

pub struct CredentialUpsertWorkflow;

impl OrbitWorkflow for CredentialUpsertWorkflow {
    type Input = CredentialInput;
    type Output = CredentialOutput;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: UPSERT_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            let record: CredentialRecord = ctx
                .activity(
                    "credential.load",
                    LoadCredentialInput {
                        cred_id: input.cred_id.clone(),
                    },
                )
                .run()
                .await?;
            ctx.activity("credential.sync", SyncCredentialInput { record })
                .run::<()>()
                .await?;
            ctx.activity(
                "credential.update_status",
                UpdateCredentialStatusInput {
                    cred_id: input.cred_id.clone(),
                    status: "active".to_string(),
                },
            )
            .run::<()>()
            .await?;
            Ok(CredentialOutput {
                cred_id: input.cred_id,
                status: "active".to_string(),
            })
        })
    }
}

pub struct CredentialRevokeWorkflow;

impl OrbitWorkflow for CredentialRevokeWorkflow {
    type Input = CredentialInput;
    type Output = CredentialOutput;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: REVOKE_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            let record: CredentialRecord = ctx
                .activity(
                    "credential.load",
                    LoadCredentialInput {
                        cred_id: input.cred_id.clone(),
                    },
                )
                .run()
                .await?;
            ctx.activity("credential.revoke", SyncCredentialInput { record })
                .run::<()>()
                .await?;
            ctx.activity(
                "credential.update_status",
                UpdateCredentialStatusInput {
                    cred_id: input.cred_id.clone(),
                    status: "revoked".to_string(),
                },
            )
            .run::<()>()
            .await?;
            Ok(CredentialOutput {
                cred_id: input.cred_id,
                status: "revoked".to_string(),
            })
        })
    }
}
