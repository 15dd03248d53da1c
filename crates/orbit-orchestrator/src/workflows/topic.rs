//! Topic workflows. Outbound provisioning converges Bifrost toward the
//! CMS record (schema registration compensated on failure); inbound sync
//! workflows upsert single gateway events, deduplicated by payload
//! fingerprint in the workflow id.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use orbit_clients::{SchemaRef, TopicInfo, TopicSpec};
use orbit_core::workflow::{OrbitWorkflow, WorkflowContext, WorkflowInfo};
use orbit_core::Result;

use crate::activities::topic::{
    DeleteTopicInput, LoadTopicInput, ProvisionTopicInput, RegisterSchemaInput,
    TopicRecordKeyInput, UnregisterSchemaInput, UpdateConfigRecordInput, UpdateTopicStatusInput,
    UpsertOutcome, UpsertTopicRecordInput, ValidateSchemaInput,
};
use crate::records::TopicRecord;

pub const PROVISIONING_FAMILY: &str = "topic-provisioning";
pub const DELETION_FAMILY: &str = "topic-deletion";
pub const CREATED_SYNC_FAMILY: &str = "topic-created-sync";
pub const DELETED_SYNC_FAMILY: &str = "topic-deleted-sync";
pub const CONFIG_SYNC_FAMILY: &str = "topic-config-sync";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicWorkflowInput {
    pub topic_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicWorkflowOutput {
    pub topic_id: String,
    pub status: String,
    #[serde(default)]
    pub schema_id: Option<String>,
}

pub struct TopicProvisioningWorkflow;

impl OrbitWorkflow for TopicProvisioningWorkflow {
    type Input = TopicWorkflowInput;
    type Output = TopicWorkflowOutput;

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
        Box::pin(async move {
            let record: TopicRecord = ctx
                .activity(
                    "topic.load",
                    LoadTopicInput {
                        topic_id: input.topic_id.clone(),
                    },
                )
                .run()
                .await?;

            let schema_id = match &record.schema_definition {
                Some(definition) => {
                    ctx.activity(
                        "topic.validate_schema",
                        ValidateSchemaInput {
                            definition: definition.clone(),
                        },
                    )
                    .no_retry()
                    .run::<()>()
                    .await?;

                    let schema: SchemaRef = ctx
                        .activity(
                            "topic.register_schema",
                            RegisterSchemaInput {
                                subject: record.name.clone(),
                                definition: definition.clone(),
                            },
                        )
                        .run()
                        .await?;
                    // Undone if topic creation fails below.
                    ctx.compensate(
                        "topic.unregister_schema",
                        UnregisterSchemaInput {
                            id: schema.id.clone(),
                        },
                    )?;
                    Some(schema.id)
                }
                None => None,
            };

            let info: TopicInfo = ctx
                .activity(
                    "topic.provision",
                    ProvisionTopicInput {
                        spec: TopicSpec {
                            virtual_cluster: record.virtual_cluster.clone(),
                            name: record.name.clone(),
                            partitions: record.partitions,
                            config: record.config.clone(),
                            schema_id: schema_id.clone(),
                        },
                    },
                )
                .run()
                .await?;

            ctx.activity(
                "topic.update_status",
                UpdateTopicStatusInput {
                    topic_id: input.topic_id.clone(),
                    status: "active".to_string(),
                    schema_id: schema_id.clone(),
                    bifrost_ref: Some(info.bifrost_ref),
                },
            )
            .run::<()>()
            .await?;

            Ok(TopicWorkflowOutput {
                topic_id: input.topic_id,
                status: "active".to_string(),
                schema_id,
            })
        })
    }
}

pub struct TopicDeletionWorkflow;

impl OrbitWorkflow for TopicDeletionWorkflow {
    type Input = TopicWorkflowInput;
    type Output = TopicWorkflowOutput;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: DELETION_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            let record: TopicRecord = ctx
                .activity(
                    "topic.load",
                    LoadTopicInput {
                        topic_id: input.topic_id.clone(),
                    },
                )
                .run()
                .await?;

            ctx.activity(
                "topic.delete",
                DeleteTopicInput {
                    virtual_cluster: record.virtual_cluster.clone(),
                    name: record.name.clone(),
                },
            )
            .run::<()>()
            .await?;

            if let Some(schema_id) = &record.schema_id {
                ctx.activity(
                    "topic.unregister_schema",
                    UnregisterSchemaInput {
                        id: schema_id.clone(),
                    },
                )
                .run::<()>()
                .await?;
            }

            ctx.activity(
                "topic.update_status",
                UpdateTopicStatusInput {
                    topic_id: input.topic_id.clone(),
                    status: "deleted".to_string(),
                    schema_id: None,
                    bifrost_ref: None,
                },
            )
            .run::<()>()
            .await?;

            Ok(TopicWorkflowOutput {
                topic_id: input.topic_id,
                status: "deleted".to_string(),
                schema_id: None,
            })
        })
    }
}

/// Gateway event: a topic appeared on the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicCreatedEvent {
    pub virtual_cluster_id: String,
    pub name: String,
    #[serde(default)]
    pub partitions: Option<u32>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

pub struct TopicCreatedSyncWorkflow;

impl OrbitWorkflow for TopicCreatedSyncWorkflow {
    type Input = TopicCreatedEvent;
    type Output = UpsertOutcome;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: CREATED_SYNC_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            ctx.activity(
                "topic.upsert_record",
                UpsertTopicRecordInput {
                    virtual_cluster_id: input.virtual_cluster_id,
                    name: input.name,
                    partitions: input.partitions,
                    config: input.config,
                },
            )
            .run()
            .await
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDeletedEvent {
    pub virtual_cluster_id: String,
    pub name: String,
}

pub struct TopicDeletedSyncWorkflow;

impl OrbitWorkflow for TopicDeletedSyncWorkflow {
    type Input = TopicDeletedEvent;
    type Output = ();

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: DELETED_SYNC_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            ctx.activity(
                "topic.soft_delete_record",
                TopicRecordKeyInput {
                    virtual_cluster_id: input.virtual_cluster_id,
                    name: input.name,
                },
            )
            .run()
            .await
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfigEvent {
    pub virtual_cluster_id: String,
    pub name: String,
    pub config: BTreeMap<String, String>,
}

pub struct TopicConfigSyncWorkflow;

impl OrbitWorkflow for TopicConfigSyncWorkflow {
    type Input = TopicConfigEvent;
    type Output = ();

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: CONFIG_SYNC_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            ctx.activity(
                "topic.update_config_record",
                UpdateConfigRecordInput {
                    virtual_cluster_id: input.virtual_cluster_id,
                    name: input.name,
                    config: input.config,
                },
            )
            .run()
            .await
        })
    }
}
