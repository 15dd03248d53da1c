//! Virtual-cluster provisioning activities. The CMS record and the
//! Bifrost record move together: creation is compensated by record
//! deletion when the Bifrost push fails.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use orbit_clients::payload::{collections, find_as, get_as, Filter};
use orbit_clients::{IdempotencyKey, VirtualClusterInfo, VirtualClusterSpec};
use orbit_core::activity::ActivityRegistry;
use orbit_core::ErrorKind;

use crate::deps::WorkerDeps;
use crate::records::{ApplicationRecord, VirtualClusterRecord};
use crate::services::text::slugify;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentMappingInput {
    pub app_id: String,
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentMapping {
    pub logical_name: String,
    pub workspace_slug: String,
    pub app_slug: String,
    pub workspace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecordInput {
    pub app_id: String,
    pub environment: String,
    pub logical_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedRecord {
    pub record_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushToBifrostInput {
    pub spec: VirtualClusterSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySpecInput {
    pub expected: VirtualClusterSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub matches: bool,
    #[serde(default)]
    pub info: Option<VirtualClusterInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRecordStatusInput {
    pub record_id: String,
    pub status: String,
    #[serde(default)]
    pub bifrost_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRecordInput {
    pub record_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAppStatusInput {
    pub app_id: String,
    pub status: String,
}

pub fn register(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    let d = deps.clone();
    reg.register("vc.environment_mapping", move |_ctx, input: EnvironmentMappingInput| {
        let d = d.clone();
        async move {
            let app: ApplicationRecord =
                get_as(d.cms.as_ref(), collections::APPLICATIONS, &input.app_id).await?;
            let workspace_slug = slugify(&app.workspace_slug);
            let app_slug = slugify(&app.slug);
            Ok(EnvironmentMapping {
                logical_name: format!("{workspace_slug}-{app_slug}-{}", input.environment),
                workspace_slug,
                app_slug,
                workspace: app.workspace,
            })
        }
    });

    let d = deps.clone();
    reg.register("vc.create_record", move |_ctx, input: CreateRecordInput| {
        let d = d.clone();
        async move {
            // A retried attempt may have created the record already.
            let existing: Vec<VirtualClusterRecord> = find_as(
                d.cms.as_ref(),
                collections::VIRTUAL_CLUSTERS,
                &Filter::new()
                    .eq("app", &input.app_id)
                    .eq("environment", &input.environment),
            )
            .await?;
            if let Some(record) = existing.into_iter().next() {
                return Ok(CreatedRecord {
                    record_id: record.id,
                });
            }

            let doc = d
                .cms
                .create(
                    collections::VIRTUAL_CLUSTERS,
                    serde_json::json!({
                        "app": input.app_id,
                        "environment": input.environment,
                        "logicalName": input.logical_name,
                        "status": "provisioning",
                    }),
                )
                .await?;
            Ok(CreatedRecord {
                record_id: doc
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })
        }
    });

    let d = deps.clone();
    reg.register("vc.push_to_bifrost", move |ctx, input: PushToBifrostInput| {
        let d = d.clone();
        async move {
            let key = IdempotencyKey::derive(
                "create_virtual_cluster",
                &input.spec.logical_name,
                &ctx.workflow_id,
            );
            d.bifrost.create_virtual_cluster(input.spec, key).await
        }
    });

    let d = deps.clone();
    reg.register("vc.verify_spec", move |_ctx, input: VerifySpecInput| {
        let d = d.clone();
        async move {
            let info = d
                .bifrost
                .get_virtual_cluster(&input.expected.logical_name)
                .await?;
            let matches = info
                .as_ref()
                .map(|i| i.logical_name == input.expected.logical_name && !i.read_only)
                .unwrap_or(false);
            Ok(VerifyOutcome { matches, info })
        }
    });

    let d = deps.clone();
    reg.register("vc.update_status", move |_ctx, input: UpdateRecordStatusInput| {
        let d = d.clone();
        async move {
            d.cms
                .patch(
                    collections::VIRTUAL_CLUSTERS,
                    &input.record_id,
                    serde_json::json!({
                        "status": input.status,
                        "bifrostRef": input.bifrost_ref,
                    }),
                )
                .await?;
            Ok(())
        }
    });

    let d = deps.clone();
    reg.register("vc.delete_record", move |_ctx, input: DeleteRecordInput| {
        let d = d.clone();
        async move {
            match d
                .cms
                .delete(collections::VIRTUAL_CLUSTERS, &input.record_id)
                .await
            {
                Ok(()) => Ok(()),
                Err(e) if e.kind == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        }
    });

    let d = deps.clone();
    reg.register("vc.update_app_status", move |_ctx, input: UpdateAppStatusInput| {
        let d = d.clone();
        async move {
            d.cms
                .patch(
                    collections::APPLICATIONS,
                    &input.app_id,
                    serde_json::json!({ "status": input.status }),
                )
                .await?;
            Ok(())
        }
    });
}
