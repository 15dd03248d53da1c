//! Access-share activities, the credential pattern applied to shares.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use orbit_clients::payload::{collections, get_as};
use orbit_clients::{AccessShareSpec, IdempotencyKey};
use orbit_core::activity::ActivityRegistry;

use crate::deps::WorkerDeps;
use crate::records::ShareRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadShareInput {
    pub share_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareActionInput {
    pub record: ShareRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateShareStatusInput {
    pub share_id: String,
    pub status: String,
}

pub fn register(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    let d = deps.clone();
    reg.register("access.load", move |_ctx, input: LoadShareInput| {
        let d = d.clone();
        async move {
            get_as::<ShareRecord>(d.cms.as_ref(), collections::SHARES, &input.share_id).await
        }
    });

    let d = deps.clone();
    reg.register("access.provision", move |ctx, input: ShareActionInput| {
        let d = d.clone();
        async move {
            let key =
                IdempotencyKey::derive("upsert_access_share", &input.record.id, &ctx.workflow_id);
            d.bifrost
                .upsert_access_share(
                    AccessShareSpec {
                        share_id: input.record.id,
                        source_cluster: input.record.source_cluster,
                        target_principal: input.record.target_principal,
                        scopes: input.record.scopes,
                    },
                    key,
                )
                .await
        }
    });

    let d = deps.clone();
    reg.register("access.revoke", move |ctx, input: ShareActionInput| {
        let d = d.clone();
        async move {
            let key =
                IdempotencyKey::derive("revoke_access_share", &input.record.id, &ctx.workflow_id);
            d.bifrost.revoke_access_share(&input.record.id, key).await
        }
    });

    let d = deps.clone();
    reg.register("access.update_status", move |_ctx, input: UpdateShareStatusInput| {
        let d = d.clone();
        async move {
            d.cms
                .patch(
                    collections::SHARES,
                    &input.share_id,
                    serde_json::json!({ "status": input.status }),
                )
                .await?;
            Ok(())
        }
    });
}
