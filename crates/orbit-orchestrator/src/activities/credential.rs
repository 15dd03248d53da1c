//! Credential sync activities: the CMS record is canonical, Bifrost is
//! converged toward it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use orbit_clients::payload::{collections, get_as};
use orbit_clients::{CredentialSpec, IdempotencyKey};
use orbit_core::activity::ActivityRegistry;

use crate::deps::WorkerDeps;
use crate::records::CredentialRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadCredentialInput {
    pub cred_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCredentialInput {
    pub record: CredentialRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCredentialStatusInput {
    pub cred_id: String,
    pub status: String,
}

pub fn register(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    let d = deps.clone();
    reg.register("credential.load", move |_ctx, input: LoadCredentialInput| {
        let d = d.clone();
        async move {
            get_as::<CredentialRecord>(d.cms.as_ref(), collections::CREDENTIALS, &input.cred_id)
                .await
        }
    });

    let d = deps.clone();
    reg.register("credential.sync", move |ctx, input: SyncCredentialInput| {
        let d = d.clone();
        async move {
            let key =
                IdempotencyKey::derive("upsert_credential", &input.record.id, &ctx.workflow_id);
            d.bifrost
                .upsert_credential(
                    CredentialSpec {
                        principal: input.record.principal,
                        cluster: input.record.cluster,
                        scopes: input.record.scopes,
                        hashed_secret: input.record.hashed_secret,
                    },
                    key,
                )
                .await
        }
    });

    let d = deps.clone();
    reg.register("credential.revoke", move |ctx, input: SyncCredentialInput| {
        let d = d.clone();
        async move {
            let key =
                IdempotencyKey::derive("revoke_credential", &input.record.id, &ctx.workflow_id);
            d.bifrost
                .revoke_credential(&input.record.cluster, &input.record.principal, key)
                .await
        }
    });

    let d = deps.clone();
    reg.register(
        "credential.update_status",
        move |_ctx, input: UpdateCredentialStatusInput| {
            let d = d.clone();
            async move {
                d.cms
                    .patch(
                        collections::CREDENTIALS,
                        &input.cred_id,
                        serde_json::json!({ "status": input.status }),
                    )
                    .await?;
                Ok(())
            }
        },
    );
}
