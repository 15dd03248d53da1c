//! Topic activities: outbound provisioning against Bifrost and inbound
//! gateway-event sync into the CMS.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use orbit_clients::payload::{collections, find_as, get_as, Filter};
use orbit_clients::{IdempotencyKey, SchemaSpec, TopicSpec};
use orbit_core::activity::ActivityRegistry;
use orbit_core::{OrbitError, Result};

use crate::deps::WorkerDeps;
use crate::records::TopicRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTopicInput {
    pub topic_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateSchemaInput {
    pub definition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSchemaInput {
    pub subject: String,
    pub definition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterSchemaInput {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionTopicInput {
    pub spec: TopicSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTopicInput {
    pub virtual_cluster: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTopicStatusInput {
    pub topic_id: String,
    pub status: String,
    #[serde(default)]
    pub schema_id: Option<String>,
    #[serde(default)]
    pub bifrost_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertTopicRecordInput {
    pub virtual_cluster_id: String,
    pub name: String,
    #[serde(default)]
    pub partitions: Option<u32>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub record_id: String,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRecordKeyInput {
    pub virtual_cluster_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfigRecordInput {
    pub virtual_cluster_id: String,
    pub name: String,
    pub config: BTreeMap<String, String>,
}

pub(crate) fn validate_schema_definition(definition: &str) -> Result<()> {
    if definition.trim().is_empty() {
        return Err(OrbitError::validation("schema definition is empty"));
    }
    let parsed: serde_json::Value = serde_json::from_str(definition)
        .map_err(|e| OrbitError::validation(format!("schema is not valid json: {e}")))?;
    if !parsed.is_object() {
        return Err(OrbitError::validation("schema must be a json object"));
    }
    Ok(())
}

async fn find_topic_record(
    deps: &WorkerDeps,
    virtual_cluster_id: &str,
    name: &str,
) -> Result<Option<TopicRecord>> {
    let records: Vec<TopicRecord> = find_as(
        deps.cms.as_ref(),
        collections::TOPICS,
        &Filter::new()
            .eq("virtualCluster", virtual_cluster_id)
            .eq("name", name),
    )
    .await?;
    Ok(records.into_iter().next())
}

pub fn register(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    let d = deps.clone();
    reg.register("topic.load", move |_ctx, input: LoadTopicInput| {
        let d = d.clone();
        async move {
            get_as::<TopicRecord>(d.cms.as_ref(), collections::TOPICS, &input.topic_id).await
        }
    });

    reg.register("topic.validate_schema", move |_ctx, input: ValidateSchemaInput| async move {
        validate_schema_definition(&input.definition)
    });

    let d = deps.clone();
    reg.register("topic.register_schema", move |ctx, input: RegisterSchemaInput| {
        let d = d.clone();
        async move {
            let key = IdempotencyKey::derive("register_schema", &input.subject, &ctx.workflow_id);
            d.bifrost
                .register_schema(
                    SchemaSpec {
                        subject: input.subject,
                        definition: input.definition,
                    },
                    key,
                )
                .await
        }
    });

    let d = deps.clone();
    reg.register("topic.unregister_schema", move |ctx, input: UnregisterSchemaInput| {
        let d = d.clone();
        async move {
            let key = IdempotencyKey::derive("unregister_schema", &input.id, &ctx.workflow_id);
            d.bifrost.unregister_schema(&input.id, key).await
        }
    });

    let d = deps.clone();
    reg.register("topic.provision", move |ctx, input: ProvisionTopicInput| {
        let d = d.clone();
        async move {
            let entity = format!("{}/{}", input.spec.virtual_cluster, input.spec.name);
            let key = IdempotencyKey::derive("create_topic", &entity, &ctx.workflow_id);
            d.bifrost.create_topic(input.spec, key).await
        }
    });

    let d = deps.clone();
    reg.register("topic.delete", move |ctx, input: DeleteTopicInput| {
        let d = d.clone();
        async move {
            let entity = format!("{}/{}", input.virtual_cluster, input.name);
            let key = IdempotencyKey::derive("delete_topic", &entity, &ctx.workflow_id);
            d.bifrost
                .delete_topic(&input.virtual_cluster, &input.name, key)
                .await
        }
    });

    let d = deps.clone();
    reg.register("topic.update_status", move |_ctx, input: UpdateTopicStatusInput| {
        let d = d.clone();
        async move {
            let mut changes = serde_json::json!({ "status": input.status });
            if let Some(schema_id) = &input.schema_id {
                changes["schemaId"] = serde_json::json!(schema_id);
            }
            if let Some(bifrost_ref) = &input.bifrost_ref {
                changes["bifrostRef"] = serde_json::json!(bifrost_ref);
            }
            d.cms
                .patch(collections::TOPICS, &input.topic_id, changes)
                .await?;
            Ok(())
        }
    });

    let d = deps.clone();
    reg.register("topic.upsert_record", move |_ctx, input: UpsertTopicRecordInput| {
        let d = d.clone();
        async move {
            if let Some(existing) =
                find_topic_record(&d, &input.virtual_cluster_id, &input.name).await?
            {
                // Same name on the same cluster: update, never duplicate.
                d.cms
                    .patch(
                        collections::TOPICS,
                        &existing.id,
                        serde_json::json!({
                            "config": input.config,
                            "partitions": input.partitions.unwrap_or(existing.partitions),
                            "status": "active",
                        }),
                    )
                    .await?;
                return Ok(UpsertOutcome {
                    record_id: existing.id,
                    created: false,
                });
            }

            let doc = d
                .cms
                .create(
                    collections::TOPICS,
                    serde_json::json!({
                        "virtualCluster": input.virtual_cluster_id,
                        "name": input.name,
                        "partitions": input.partitions.unwrap_or(3),
                        "config": input.config,
                        "status": "active",
                    }),
                )
                .await?;
            Ok(UpsertOutcome {
                record_id: doc
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                created: true,
            })
        }
    });

    let d = deps.clone();
    reg.register("topic.soft_delete_record", move |_ctx, input: TopicRecordKeyInput| {
        let d = d.clone();
        async move {
            if let Some(existing) =
                find_topic_record(&d, &input.virtual_cluster_id, &input.name).await?
            {
                d.cms
                    .patch(
                        collections::TOPICS,
                        &existing.id,
                        serde_json::json!({ "status": "deleted" }),
                    )
                    .await?;
            }
            Ok(())
        }
    });

    let d = deps.clone();
    reg.register(
        "topic.update_config_record",
        move |_ctx, input: UpdateConfigRecordInput| {
            let d = d.clone();
            async move {
                if let Some(existing) =
                    find_topic_record(&d, &input.virtual_cluster_id, &input.name).await?
                {
                    d.cms
                        .patch(
                            collections::TOPICS,
                            &existing.id,
                            serde_json::json!({ "config": input.config }),
                        )
                        .await?;
                }
                Ok(())
            }
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_validation() {
        assert!(validate_schema_definition(r#"{"type": "record", "fields": []}"#).is_ok());
        assert!(validate_schema_definition("").is_err());
        assert!(validate_schema_definition("not json").is_err());
        assert!(validate_schema_definition("[1, 2]").is_err());
    }
}
