//! Template instantiation:
//! `Pending → Validating → Creating → [Cloning → Applying → Pushing →]
//! Finalizing → Completed`. Work-dir cleanup is registered as a finalizer
//! before any tree is created, so it runs on every outcome.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use orbit_clients::RepoRef;
use orbit_core::workflow::{OrbitWorkflow, Progress, WorkflowContext, WorkflowId, WorkflowInfo};
use orbit_core::{ErrorKind, Result};

use crate::activities::git::{
    CleanupWorkDirInput, CloneResult, CloneTemplateInput, PushToNewRepoInput, PushedCommit,
};
use crate::activities::template::{
    CreateEmptyRepoInput, CreateFromTemplateInput, FinalizeInput, FinalizeResult,
    ValidateInstantiationInput,
};
use crate::activities::token::{DecryptTokenInput, FindInstallationInput, TokenGrant};
use crate::deps::WorkDirKind;
use crate::records::InstallationRecord;
use crate::workflows::token_refresh::{GitHubTokenRefreshWorkflow, TokenRefreshInput};

pub const FAMILY: &str = "template-instantiation";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateInstantiationInput {
    pub template_id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub target_org: String,
    pub repository_name: String,
    pub is_github_template: bool,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub installation_override: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateInstantiationOutput {
    pub repository_url: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
}

pub struct TemplateInstantiationWorkflow;

impl TemplateInstantiationWorkflow {
    /// Fetch a usable token, kicking the refresh loop when the stored one
    /// is expired.
    async fn workspace_token(
        ctx: &WorkflowContext,
        input: &TemplateInstantiationInput,
    ) -> Result<String> {
        let installation: InstallationRecord = ctx
            .activity(
                "token.find_installation",
                FindInstallationInput {
                    workspace_id: input.workspace_id.clone(),
                    override_installation: input.installation_override.clone(),
                },
            )
            .run()
            .await?;

        let grant = ctx
            .activity(
                "token.decrypt",
                DecryptTokenInput {
                    installation: installation.clone(),
                },
            )
            .run::<TokenGrant>()
            .await;

        match grant {
            Ok(grant) => Ok(grant.token),
            Err(e) if e.kind == ErrorKind::TokenExpired => {
                ctx.start_workflow::<GitHubTokenRefreshWorkflow>(
                    WorkflowId::derive("token-refresh", &installation.id),
                    TokenRefreshInput {
                        installation_doc_id: installation.id.clone(),
                    },
                )
                .await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

impl OrbitWorkflow for TemplateInstantiationWorkflow {
    type Input = TemplateInstantiationInput;
    type Output = TemplateInstantiationOutput;

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
            let started = ctx.start_time();
            // Step count is fixed per path so percent never regresses.
            let total: u32 = if input.is_github_template { 3 } else { 6 };
            let mut completed: u32 = 0;

            ctx.publish_progress(&Progress::at_step(
                "pending",
                completed,
                total,
                "instantiation queued",
                started,
            ));
            ctx.finally(
                "git.cleanup_work_dir",
                CleanupWorkDirInput {
                    kind: WorkDirKind::Template,
                },
            )?;

            ctx.publish_progress(&Progress::at_step(
                "validating",
                completed,
                total,
                "checking instantiation input",
                started,
            ));
            ctx.activity(
                "template.validate",
                ValidateInstantiationInput {
                    template_id: input.template_id.clone(),
                    workspace_id: input.workspace_id.clone(),
                    target_org: input.target_org.clone(),
                    repository_name: input.repository_name.clone(),
                    variables: input.variables.clone(),
                },
            )
            .no_retry()
            .run::<()>()
            .await?;
            completed += 1;

            let token = Self::workspace_token(ctx, &input).await?;

            let (repo, commit_sha): (RepoRef, Option<String>) = if input.is_github_template {
                ctx.publish_progress(&Progress::at_step(
                    "creating",
                    completed,
                    total,
                    "generating repository from template",
                    started,
                ));
                let repo: RepoRef = ctx
                    .activity(
                        "template.create_from_template",
                        CreateFromTemplateInput {
                            template_id: input.template_id.clone(),
                            target_org: input.target_org.clone(),
                            repository_name: input.repository_name.clone(),
                            token: token.clone(),
                        },
                    )
                    .run()
                    .await?;
                completed += 1;
                (repo, None)
            } else {
                ctx.publish_progress(&Progress::at_step(
                    "creating",
                    completed,
                    total,
                    "creating empty repository",
                    started,
                ));
                let repo: RepoRef = ctx
                    .activity(
                        "template.create_empty_repo",
                        CreateEmptyRepoInput {
                            target_org: input.target_org.clone(),
                            repository_name: input.repository_name.clone(),
                            token: token.clone(),
                        },
                    )
                    .run()
                    .await?;
                completed += 1;

                ctx.publish_progress(&Progress::at_step(
                    "cloning",
                    completed,
                    total,
                    "cloning template sources",
                    started,
                ));
                let _clone: CloneResult = ctx
                    .activity(
                        "git.clone_template",
                        CloneTemplateInput {
                            template_id: input.template_id.clone(),
                            token: token.clone(),
                        },
                    )
                    .long_running()
                    .run()
                    .await?;
                completed += 1;

                ctx.publish_progress(&Progress::at_step(
                    "applying",
                    completed,
                    total,
                    "substituting template variables",
                    started,
                ));
                ctx.activity(
                    "template.apply_variables",
                    crate::activities::template::ApplyVariablesInput {
                        variables: input.variables.clone(),
                    },
                )
                .run::<crate::services::AppliedStats>()
                .await?;
                completed += 1;

                ctx.publish_progress(&Progress::at_step(
                    "pushing",
                    completed,
                    total,
                    "pushing initial commit",
                    started,
                ));
                let pushed: PushedCommit = ctx
                    .activity(
                        "git.push_to_new_repo",
                        PushToNewRepoInput {
                            repo: repo.clone(),
                            token: token.clone(),
                            started_at: started,
                        },
                    )
                    .long_running()
                    .run()
                    .await?;
                completed += 1;
                (repo, Some(pushed.commit_sha))
            };

            ctx.publish_progress(&Progress::at_step(
                "finalizing",
                completed,
                total,
                "recording repository",
                started,
            ));
            let finalized: FinalizeResult = ctx
                .activity(
                    "template.finalize",
                    FinalizeInput {
                        template_id: input.template_id.clone(),
                        workspace_id: input.workspace_id.clone(),
                        user_id: input.user_id.clone(),
                        repo,
                        commit_sha: commit_sha.clone(),
                    },
                )
                .run()
                .await?;

            ctx.publish_progress(&Progress::finished(
                "finalize",
                "repository ready",
                started,
            ));
            Ok(TemplateInstantiationOutput {
                repository_url: finalized.repository_url,
                commit_sha,
            })
        })
    }
}
