//! Container build: quota check, analysis (possibly waiting on a user
//! choice), the streamed build, image tracking, and a final status row
//! written in a detached scope on every outcome.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use orbit_core::workflow::{OrbitWorkflow, WorkflowContext, WorkflowInfo};
use orbit_core::{ErrorKind, OrbitError, Result, RetryPolicy};

use crate::activities::build::{
    AnalyzeRepositoryInput, BuiltImage, CheckQuotaInput, PersistChoicesInput, QuotaReport,
    RunBuildInput, TrackImageInput, UpdateBuildStatusInput,
};
use crate::activities::token::{DecryptTokenInput, FindInstallationInput, TokenGrant};
use crate::records::InstallationRecord;
use crate::services::detect::{config_for_candidate, DetectedBuildConfig, Detection};

pub const FAMILY: &str = "build";

/// How long the user has to answer an ambiguous detection.
const USER_CHOICE_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

pub const USER_CHOICE_SIGNAL: &str = "user_choice";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInput {
    pub app_id: String,
    pub workspace_id: String,
    pub git_ref: String,
    pub registry_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutput {
    pub image_ref: String,
    pub digest: String,
    pub config: DetectedBuildConfig,
}

pub struct BuildWorkflow;

impl BuildWorkflow {
    async fn run_inner(ctx: &WorkflowContext, input: &BuildInput) -> Result<BuildOutput> {
        let _quota: QuotaReport = ctx
            .activity(
                "build.check_quota",
                CheckQuotaInput {
                    app_id: input.app_id.clone(),
                },
            )
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

        let detection: Detection = ctx
            .activity(
                "build.analyze_repository",
                AnalyzeRepositoryInput {
                    app_id: input.app_id.clone(),
                    git_ref: input.git_ref.clone(),
                    token: grant.token.clone(),
                },
            )
            .long_running()
            .run()
            .await?;

        let config = match detection {
            Detection::Resolved { config } => config,
            Detection::Ambiguous { candidates } => {
                ctx.activity(
                    "build.persist_choices",
                    PersistChoicesInput {
                        app_id: input.app_id.clone(),
                        candidates: candidates.clone(),
                    },
                )
                .run::<()>()
                .await?;

                match ctx
                    .wait_signal::<String>(USER_CHOICE_SIGNAL, USER_CHOICE_TIMEOUT)
                    .await?
                {
                    Some(choice) if candidates.contains(&choice) => config_for_candidate(&choice)?,
                    Some(choice) => {
                        return Err(OrbitError::validation(format!(
                            "choice {choice:?} is not among the offered candidates"
                        )))
                    }
                    None => {
                        return Err(OrbitError::user_abandoned(
                            "no build configuration chosen within 24h",
                        ))
                    }
                }
            }
        };

        // Registry auth failures are terminal; transport blips retry.
        let built: BuiltImage = ctx
            .activity(
                "build.run",
                RunBuildInput {
                    app_id: input.app_id.clone(),
                    git_ref: input.git_ref.clone(),
                    token: grant.token.clone(),
                    registry_ref: input.registry_ref.clone(),
                    config: config.clone(),
                },
            )
            .long_running()
            .retry_policy(RetryPolicy::with_max_attempts(5))
            .run()
            .await?;

        // Strictly after a successful build-and-push.
        ctx.activity(
            "build.track_image",
            TrackImageInput {
                app_id: input.app_id.clone(),
                image_ref: built.image_ref.clone(),
                digest: built.digest.clone(),
            },
        )
        .run::<()>()
        .await?;

        Ok(BuildOutput {
            image_ref: built.image_ref,
            digest: built.digest,
            config,
        })
    }
}

impl OrbitWorkflow for BuildWorkflow {
    type Input = BuildInput;
    type Output = BuildOutput;

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
            let result = Self::run_inner(ctx, &input).await;

            let status = match &result {
                Ok(output) => UpdateBuildStatusInput {
                    app_id: input.app_id.clone(),
                    status: "succeeded".to_string(),
                    error_code: None,
                    image_ref: Some(output.image_ref.clone()),
                },
                Err(e) if e.kind == ErrorKind::Cancelled => UpdateBuildStatusInput {
                    app_id: input.app_id.clone(),
                    status: "cancelled".to_string(),
                    error_code: Some(e.code_str().to_string()),
                    image_ref: None,
                },
                Err(e) => UpdateBuildStatusInput {
                    app_id: input.app_id.clone(),
                    status: "failed".to_string(),
                    error_code: Some(e.code_str().to_string()),
                    image_ref: None,
                },
            };

            // Detached: a user cancel still produces a final status row.
            if let Err(e) = ctx
                .activity("build.update_status", status)
                .detached()
                .run::<()>()
                .await
            {
                tracing::warn!(app_id = %input.app_id, error = %e, "final build status write failed");
            }

            result
        })
    }
}
