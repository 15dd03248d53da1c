//! Decommissioning and delayed-cleanup activities. Every destructive step
//! is idempotent: deleting an already-deleted resource succeeds.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orbit_clients::object_store::put_archive;
use orbit_clients::payload::{collections, find_as, get_as, Filter};
use orbit_clients::{ArchiveRef, IdempotencyKey};
use orbit_core::activity::ActivityRegistry;
use orbit_core::{ErrorKind, OrbitError, Result};

use crate::deps::WorkerDeps;
use crate::records::{ApplicationRecord, CredentialRecord, TopicRecord, VirtualClusterRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInput {
    pub app_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevokeStats {
    pub revoked: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkDeletedInput {
    pub app_id: String,
    pub cleanup_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupStats {
    pub topics_removed: u32,
    pub clusters_removed: u32,
    pub credentials_removed: u32,
}

async fn app_virtual_clusters(
    deps: &WorkerDeps,
    app_id: &str,
) -> Result<Vec<VirtualClusterRecord>> {
    find_as(
        deps.cms.as_ref(),
        collections::VIRTUAL_CLUSTERS,
        &Filter::new().eq("app", app_id),
    )
    .await
}

pub fn register(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    let d = deps.clone();
    reg.register("decommission.check_status", move |_ctx, input: AppInput| {
        let d = d.clone();
        async move {
            let app: ApplicationRecord =
                get_as(d.cms.as_ref(), collections::APPLICATIONS, &input.app_id).await?;
            if app.status != "archived" {
                return Err(OrbitError::validation(format!(
                    "application {} is {:?}; only archived applications decommission",
                    input.app_id, app.status
                )));
            }
            Ok(app)
        }
    });

    let d = deps.clone();
    reg.register("decommission.set_read_only", move |ctx, input: AppInput| {
        let d = d.clone();
        async move {
            let mut flipped = 0u32;
            for record in app_virtual_clusters(&d, &input.app_id).await? {
                if record.status == "deleted" {
                    continue;
                }
                let key = IdempotencyKey::derive(
                    "set_read_only",
                    &record.logical_name,
                    &ctx.workflow_id,
                );
                d.bifrost
                    .set_virtual_cluster_read_only(&record.logical_name, true, key)
                    .await?;
                d.cms
                    .patch(
                        collections::VIRTUAL_CLUSTERS,
                        &record.id,
                        serde_json::json!({ "status": "read_only" }),
                    )
                    .await?;
                flipped += 1;
            }
            Ok(flipped)
        }
    });

    let d = deps.clone();
    reg.register("decommission.revoke_credentials", move |ctx, input: AppInput| {
        let d = d.clone();
        async move {
            // Best effort: individual failures are logged and counted,
            // never fatal.
            let credentials: Vec<CredentialRecord> = find_as(
                d.cms.as_ref(),
                collections::CREDENTIALS,
                &Filter::new().eq("app", &input.app_id),
            )
            .await?;

            let mut stats = RevokeStats::default();
            for credential in credentials {
                if credential.status == "revoked" {
                    continue;
                }
                let key = IdempotencyKey::derive(
                    "revoke_credential",
                    &credential.id,
                    &ctx.workflow_id,
                );
                match d
                    .bifrost
                    .revoke_credential(&credential.cluster, &credential.principal, key)
                    .await
                {
                    Ok(()) => {
                        d.cms
                            .patch(
                                collections::CREDENTIALS,
                                &credential.id,
                                serde_json::json!({ "status": "revoked" }),
                            )
                            .await?;
                        stats.revoked += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            credential = %credential.id,
                            error = %e,
                            "credential revoke failed during decommission"
                        );
                        stats.failed += 1;
                    }
                }
            }
            Ok(stats)
        }
    });

    let d = deps.clone();
    reg.register("decommission.archive_metrics", move |_ctx, input: AppInput| {
        let d = d.clone();
        async move {
            let edges = d
                .cms
                .find(
                    collections::LINEAGE_EDGES,
                    &Filter::new().eq("producerApp", &input.app_id),
                )
                .await?;
            let consumed = d
                .cms
                .find(
                    collections::LINEAGE_EDGES,
                    &Filter::new().eq("consumerApp", &input.app_id),
                )
                .await?;
            let clusters = app_virtual_clusters(&d, &input.app_id).await?;

            let payload = serde_json::json!({
                "app": input.app_id,
                "producedEdges": edges,
                "consumedEdges": consumed,
                "virtualClusters": clusters,
            });
            let bytes = serde_json::to_vec(&payload)?;
            let archive: ArchiveRef = put_archive(d.store.as_ref(), &input.app_id, bytes).await?;
            Ok(archive)
        }
    });

    let d = deps.clone();
    reg.register("decommission.mark_deleted", move |_ctx, input: MarkDeletedInput| {
        let d = d.clone();
        async move {
            d.cms
                .patch(
                    collections::APPLICATIONS,
                    &input.app_id,
                    serde_json::json!({
                        "status": "pending_deletion",
                        "deletionScheduledAt": input.cleanup_at,
                    }),
                )
                .await?;
            Ok(())
        }
    });

    let d = deps.clone();
    reg.register("decommission.revert_status", move |_ctx, input: AppInput| {
        let d = d.clone();
        async move {
            d.cms
                .patch(
                    collections::APPLICATIONS,
                    &input.app_id,
                    serde_json::json!({
                        "status": "archived",
                        "deletionScheduledAt": serde_json::Value::Null,
                    }),
                )
                .await?;
            Ok(())
        }
    });

    let d = deps.clone();
    reg.register("decommission.delete_physical_topics", move |ctx, input: AppInput| {
        let d = d.clone();
        async move {
            let clusters = app_virtual_clusters(&d, &input.app_id).await?;
            let mut removed = 0u32;
            for cluster in &clusters {
                let topics: Vec<TopicRecord> = find_as(
                    d.cms.as_ref(),
                    collections::TOPICS,
                    &Filter::new().eq("virtualCluster", &cluster.id),
                )
                .await?;
                for topic in topics {
                    let entity = format!("{}/{}", cluster.logical_name, topic.name);
                    let key = IdempotencyKey::derive("delete_topic", &entity, &ctx.workflow_id);
                    d.bifrost
                        .delete_topic(&cluster.logical_name, &topic.name, key)
                        .await?;
                    d.cms
                        .patch(
                            collections::TOPICS,
                            &topic.id,
                            serde_json::json!({ "status": "deleted" }),
                        )
                        .await?;
                    removed += 1;
                }
            }
            Ok(removed)
        }
    });

    let d = deps.clone();
    reg.register("decommission.delete_virtual_clusters", move |ctx, input: AppInput| {
        let d = d.clone();
        async move {
            let clusters = app_virtual_clusters(&d, &input.app_id).await?;
            let mut removed = 0u32;
            for cluster in clusters {
                let key = IdempotencyKey::derive(
                    "delete_virtual_cluster",
                    &cluster.logical_name,
                    &ctx.workflow_id,
                );
                d.bifrost
                    .delete_virtual_cluster(&cluster.logical_name, key)
                    .await?;
                d.cms
                    .patch(
                        collections::VIRTUAL_CLUSTERS,
                        &cluster.id,
                        serde_json::json!({ "status": "deleted" }),
                    )
                    .await?;
                removed += 1;
            }
            Ok(removed)
        }
    });

    let d = deps.clone();
    reg.register("decommission.execute_cleanup", move |_ctx, input: AppInput| {
        let d = d.clone();
        async move {
            let mut stats = CleanupStats::default();

            let clusters = app_virtual_clusters(&d, &input.app_id).await?;
            for cluster in &clusters {
                let topics: Vec<TopicRecord> = find_as(
                    d.cms.as_ref(),
                    collections::TOPICS,
                    &Filter::new().eq("virtualCluster", &cluster.id),
                )
                .await?;
                for topic in topics {
                    delete_absorbing(&d, collections::TOPICS, &topic.id).await?;
                    stats.topics_removed += 1;
                }
            }
            for cluster in clusters {
                delete_absorbing(&d, collections::VIRTUAL_CLUSTERS, &cluster.id).await?;
                stats.clusters_removed += 1;
            }

            let credentials: Vec<CredentialRecord> = find_as(
                d.cms.as_ref(),
                collections::CREDENTIALS,
                &Filter::new().eq("app", &input.app_id),
            )
            .await?;
            for credential in credentials {
                delete_absorbing(&d, collections::CREDENTIALS, &credential.id).await?;
                stats.credentials_removed += 1;
            }

            d.cms
                .patch(
                    collections::APPLICATIONS,
                    &input.app_id,
                    serde_json::json!({ "status": "deleted" }),
                )
                .await?;
            Ok(stats)
        }
    });
}

async fn delete_absorbing(deps: &WorkerDeps, collection: &str, id: &str) -> Result<()> {
    match deps.cms.delete(collection, id).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
