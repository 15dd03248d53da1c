//! Virtual-cluster provisioning: the parent fans out one child per
//! environment and applies best-effort semantics; each child keeps the
//! CMS and Bifrost records atomic via compensation.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use orbit_clients::{VirtualClusterInfo, VirtualClusterSpec};
use orbit_core::workflow::{OrbitWorkflow, WorkflowContext, WorkflowId, WorkflowInfo};
use orbit_core::{ErrorKind, OrbitError, Result};

use crate::activities::virtual_cluster::{
    CreateRecordInput, CreatedRecord, DeleteRecordInput, EnvironmentMapping,
    EnvironmentMappingInput, PushToBifrostInput, UpdateAppStatusInput, UpdateRecordStatusInput,
    VerifyOutcome, VerifySpecInput,
};

pub const PARENT_FAMILY: &str = "virtual-cluster-provision";
pub const CHILD_FAMILY: &str = "virtual-cluster-provision-env";

/// Environments provisioned for every application, in fan-out order.
pub const ENVIRONMENTS: [&str; 3] = ["dev", "stage", "prod"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionInput {
    pub app_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvProvisionInput {
    pub app_id: String,
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvProvisionOutput {
    pub environment: String,
    pub logical_name: String,
    pub record_id: String,
    pub bifrost_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvOutcome {
    pub environment: String,
    pub succeeded: bool,
    #[serde(default)]
    pub logical_name: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionSummary {
    pub app_status: String,
    pub outcomes: Vec<EnvOutcome>,
}

pub struct VirtualClusterProvisionWorkflow;

impl OrbitWorkflow for VirtualClusterProvisionWorkflow {
    type Input = ProvisionInput;
    type Output = ProvisionSummary;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: PARENT_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            let children = ENVIRONMENTS.map(|environment| {
                ctx.child::<SingleVirtualClusterProvisionWorkflow>(
                    WorkflowId::derive(
                        CHILD_FAMILY,
                        &format!("{}:{environment}", input.app_id),
                    ),
                    EnvProvisionInput {
                        app_id: input.app_id.clone(),
                        environment: environment.to_string(),
                    },
                )
            });
            let results = futures::future::join_all(children).await;

            let outcomes: Vec<EnvOutcome> = ENVIRONMENTS
                .iter()
                .zip(results)
                .map(|(environment, result)| match result {
                    Ok(output) => EnvOutcome {
                        environment: environment.to_string(),
                        succeeded: true,
                        logical_name: Some(output.logical_name),
                        error_code: None,
                    },
                    Err(e) => EnvOutcome {
                        environment: environment.to_string(),
                        succeeded: false,
                        logical_name: None,
                        error_code: Some(e.code_str().to_string()),
                    },
                })
                .collect();

            let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
            let app_status = match succeeded {
                0 => "provision_failed",
                n if n == ENVIRONMENTS.len() => "provisioned",
                _ => "partially_provisioned",
            };

            ctx.activity(
                "vc.update_app_status",
                UpdateAppStatusInput {
                    app_id: input.app_id.clone(),
                    status: app_status.to_string(),
                },
            )
            .detached()
            .run::<()>()
            .await?;

            if succeeded == 0 {
                // Children already rolled their own records back.
                return Err(OrbitError::transient(format!(
                    "no environment provisioned for {}",
                    input.app_id
                ))
                .with_code("ALL_ENVIRONMENTS_FAILED"));
            }

            Ok(ProvisionSummary {
                app_status: app_status.to_string(),
                outcomes,
            })
        })
    }
}

pub struct SingleVirtualClusterProvisionWorkflow;

impl OrbitWorkflow for SingleVirtualClusterProvisionWorkflow {
    type Input = EnvProvisionInput;
    type Output = EnvProvisionOutput;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: CHILD_FAMILY,
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            let mapping: EnvironmentMapping = ctx
                .activity(
                    "vc.environment_mapping",
                    EnvironmentMappingInput {
                        app_id: input.app_id.clone(),
                        environment: input.environment.clone(),
                    },
                )
                .run()
                .await?;

            let record: CreatedRecord = ctx
                .activity(
                    "vc.create_record",
                    CreateRecordInput {
                        app_id: input.app_id.clone(),
                        environment: input.environment.clone(),
                        logical_name: mapping.logical_name.clone(),
                    },
                )
                .run()
                .await?;

            let spec = VirtualClusterSpec {
                logical_name: mapping.logical_name.clone(),
                environment: input.environment.clone(),
                app_id: input.app_id.clone(),
                workspace: mapping.workspace.clone(),
            };

            let pushed = ctx
                .activity("vc.push_to_bifrost", PushToBifrostInput { spec: spec.clone() })
                .run::<VirtualClusterInfo>()
                .await;

            let info = match pushed {
                Ok(info) => info,
                Err(e) if e.kind == ErrorKind::Conflict => {
                    // Name collision: success when the remote already
                    // matches what we wanted to create.
                    let verify: VerifyOutcome = ctx
                        .activity("vc.verify_spec", VerifySpecInput { expected: spec })
                        .run()
                        .await?;
                    match verify.info.filter(|_| verify.matches) {
                        Some(info) => info,
                        None => {
                            ctx.activity(
                                "vc.delete_record",
                                DeleteRecordInput {
                                    record_id: record.record_id.clone(),
                                },
                            )
                            .detached()
                            .run::<()>()
                            .await?;
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    // Keep CMS and Bifrost atomic: no remote record means
                    // no CMS record either.
                    ctx.activity(
                        "vc.delete_record",
                        DeleteRecordInput {
                            record_id: record.record_id.clone(),
                        },
                    )
                    .detached()
                    .run::<()>()
                    .await?;
                    return Err(e.with_code("BIFROST_UNAVAILABLE"));
                }
            };

            ctx.activity(
                "vc.update_status",
                UpdateRecordStatusInput {
                    record_id: record.record_id.clone(),
                    status: "active".to_string(),
                    bifrost_ref: Some(info.bifrost_ref.clone()),
                },
            )
            .run::<()>()
            .await?;

            Ok(EnvProvisionOutput {
                environment: input.environment,
                logical_name: mapping.logical_name,
                record_id: record.record_id,
                bifrost_ref: info.bifrost_ref,
            })
        })
    }
}
