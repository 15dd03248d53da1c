//! Deployment: validate, deterministic generator context, isolated
//! generation, commit and push with at most one rebase.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use orbit_core::workflow::{OrbitWorkflow, WorkflowContext, WorkflowInfo};
use orbit_core::{ErrorKind, OrbitError, Result};

use crate::activities::deployment::{
    CommitInput, CommitResult, DeploymentTarget, ExecuteGeneratorInput, GeneratedTree,
    GeneratorContext, PrepareContextInput, PushInput, PushResult, UpdateDeploymentStatusInput,
    ValidateDeploymentInput,
};
use crate::activities::git::CleanupWorkDirInput;
use crate::activities::token::{DecryptTokenInput, FindInstallationInput, TokenGrant};
use crate::deps::WorkDirKind;
use crate::records::InstallationRecord;

pub const FAMILY: &str = "deployment";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentInput {
    pub app_id: String,
    pub workspace_id: String,
    #[serde(default = "default_git_ref")]
    pub git_ref: String,
}

fn default_git_ref() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentOutput {
    pub commit_sha: String,
}

pub struct DeploymentWorkflow;

impl DeploymentWorkflow {
    async fn run_inner(ctx: &WorkflowContext, input: &DeploymentInput) -> Result<DeploymentOutput> {
        let target: DeploymentTarget = ctx
            .activity(
                "deployment.validate",
                ValidateDeploymentInput {
                    app_id: input.app_id.clone(),
                },
            )
            .no_retry()
            .run()
            .await?;

        let installation: InstallationRecord = ctx
            .activity(
                "token.find_installation",
                FindInstallationInput {
                    workspace_id: input.workspace_id.clone(),
                    override_installation: None,
                },
            )
            .run()
            .await?;
        let grant: TokenGrant = ctx
            .activity("token.decrypt", DecryptTokenInput { installation })
            .run()
            .await?;

        let context: GeneratorContext = ctx
            .activity(
                "deployment.prepare_context",
                PrepareContextInput {
                    app_id: input.app_id.clone(),
                    started_at: ctx.start_time(),
                },
            )
            .run()
            .await?;

        let _tree: GeneratedTree = ctx
            .activity(
                "deployment.execute_generator",
                ExecuteGeneratorInput {
                    context,
                    clone_url: target.clone_url.clone(),
                    token: grant.token.clone(),
                    git_ref: input.git_ref.clone(),
                },
            )
            .long_running()
            .run()
            .await?;

        ctx.activity("deployment.verify_clean", serde_json::json!({}))
            .run::<()>()
            .await?;

        let commit: CommitResult = ctx
            .activity(
                "deployment.commit",
                CommitInput {
                    message: format!("Deploy {}", target.app.slug),
                    started_at: ctx.start_time(),
                },
            )
            .run()
            .await?;

        let push: PushResult = ctx
            .activity(
                "deployment.push",
                PushInput {
                    branch: "main".to_string(),
                },
            )
            .run()
            .await?;

        if !push.pushed {
            // The remote moved under us: rebase once, then push again.
            // A second rejection (or a conflicted rebase) is terminal.
            ctx.activity("deployment.rebase", serde_json::json!({}))
                .run::<()>()
                .await
                .map_err(|e| match e.kind {
                    ErrorKind::Conflict => e.with_code("MERGE_CONFLICT"),
                    _ => e,
                })?;

            let retry: PushResult = ctx
                .activity(
                    "deployment.push",
                    PushInput {
                        branch: "main".to_string(),
                    },
                )
                .run()
                .await?;
            if !retry.pushed {
                return Err(OrbitError::conflict(
                    "push rejected again after rebase",
                )
                .with_code("MERGE_CONFLICT"));
            }
        }

        Ok(DeploymentOutput {
            commit_sha: commit.commit_sha,
        })
    }
}

impl OrbitWorkflow for DeploymentWorkflow {
    type Input = DeploymentInput;
    type Output = DeploymentOutput;

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
            ctx.finally(
                "git.cleanup_work_dir",
                CleanupWorkDirInput {
                    kind: WorkDirKind::Deployment,
                },
            )?;

            let result = Self::run_inner(ctx, &input).await;

            let status = match &result {
                Ok(output) => UpdateDeploymentStatusInput {
                    app_id: input.app_id.clone(),
                    status: "deployed".to_string(),
                    commit_sha: Some(output.commit_sha.clone()),
                    error_code: None,
                },
                Err(e) if e.kind == ErrorKind::Cancelled => UpdateDeploymentStatusInput {
                    app_id: input.app_id.clone(),
                    status: "cancelled".to_string(),
                    commit_sha: None,
                    error_code: Some(e.code_str().to_string()),
                },
                Err(e) => UpdateDeploymentStatusInput {
                    app_id: input.app_id.clone(),
                    status: "failed".to_string(),
                    commit_sha: None,
                    error_code: Some(e.code_str().to_string()),
                },
            };
            if let Err(e) = ctx
                .activity("deployment.update_status", status)
                .detached()
                .run::<()>()
                .await
            {
                tracing::warn!(app_id = %input.app_id, error = %e, "final deployment status write failed");
            }

            result
        })
    }
}
