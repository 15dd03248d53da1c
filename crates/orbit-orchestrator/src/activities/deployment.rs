//! Deployment activities: config validation, deterministic generator
//! context, manifest generation in an isolated tree, commit/push with
//! rebase support, and the final status write.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orbit_clients::payload::{collections, get_as};
use orbit_clients::{authenticated_clone_url, GitIdentity, PushOutcome};
use orbit_core::activity::ActivityRegistry;
use orbit_core::{OrbitError, Result};

use crate::deps::{WorkDirKind, WorkerDeps};
use crate::records::ApplicationRecord;
use crate::services::text::slugify;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateDeploymentInput {
    pub app_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub app: ApplicationRecord,
    pub clone_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareContextInput {
    pub app_id: String,
    /// Workflow start time: the only timestamp the generator may see.
    pub started_at: DateTime<Utc>,
}

/// Deterministic generator input: every field derives from the app record
/// or workflow attributes, so replays produce byte-identical manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorContext {
    pub app_id: String,
    pub app_slug: String,
    pub workspace_slug: String,
    pub generated_at: DateTime<Utc>,
    pub workflow_id: String,
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteGeneratorInput {
    pub context: GeneratorContext,
    pub clone_url: String,
    pub token: String,
    pub git_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTree {
    pub work_dir: String,
    pub files_written: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInput {
    pub message: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResult {
    pub commit_sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushInput {
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResult {
    pub pushed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDeploymentStatusInput {
    pub app_id: String,
    pub status: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

/// Render the deployment manifest for a context. Pure; content depends
/// only on the context fields.
fn render_manifest(context: &GeneratorContext) -> String {
    let mut manifest = String::new();
    manifest.push_str("# generated by orbit deployment\n");
    manifest.push_str(&format!("app: {}\n", context.app_slug));
    manifest.push_str(&format!("workspace: {}\n", context.workspace_slug));
    manifest.push_str(&format!("workflow: {}\n", context.workflow_id));
    manifest.push_str(&format!(
        "generatedAt: {}\n",
        context.generated_at.to_rfc3339()
    ));
    for (key, value) in &context.values {
        manifest.push_str(&format!("{key}: {value}\n"));
    }
    manifest
}

pub fn register(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    let d = deps.clone();
    reg.register("deployment.validate", move |_ctx, input: ValidateDeploymentInput| {
        let d = d.clone();
        async move {
            let app: ApplicationRecord =
                get_as(d.cms.as_ref(), collections::APPLICATIONS, &input.app_id).await?;
            if app.status == "deleted" || app.status == "pending_deletion" {
                return Err(OrbitError::validation(format!(
                    "application {} is {} and cannot be deployed",
                    input.app_id, app.status
                )));
            }
            let clone_url = app
                .clone_url
                .clone()
                .or_else(|| app.git_url.clone())
                .ok_or_else(|| {
                    OrbitError::validation(format!(
                        "application {} has no repository to deploy into",
                        input.app_id
                    ))
                })?;
            Ok(DeploymentTarget { app, clone_url })
        }
    });

    let d = deps.clone();
    reg.register("deployment.prepare_context", move |ctx, input: PrepareContextInput| {
        let d = d.clone();
        async move {
            let app: ApplicationRecord =
                get_as(d.cms.as_ref(), collections::APPLICATIONS, &input.app_id).await?;
            let mut values = BTreeMap::new();
            values.insert("replicas".to_string(), "2".to_string());
            values.insert("serviceName".to_string(), slugify(&app.name));
            Ok(GeneratorContext {
                app_id: app.id,
                app_slug: app.slug,
                workspace_slug: app.workspace_slug,
                generated_at: input.started_at,
                workflow_id: ctx.workflow_id.clone(),
                values,
            })
        }
    });

    let d = deps.clone();
    reg.register("deployment.execute_generator", move |ctx, input: ExecuteGeneratorInput| {
        let d = d.clone();
        async move {
            let dir = d.work_dir(WorkDirKind::Deployment, &ctx.workflow_id);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            let url = authenticated_clone_url(&input.clone_url, &input.token);
            d.git.clone_repo(&url, &dir, None).await?;

            let deploy_dir = dir.join("deploy");
            std::fs::create_dir_all(&deploy_dir)?;
            std::fs::write(
                deploy_dir.join("orbit.yaml"),
                render_manifest(&input.context),
            )?;
            Ok(GeneratedTree {
                work_dir: dir.display().to_string(),
                files_written: 1,
            })
        }
    });

    let d = deps.clone();
    reg.register("deployment.verify_clean", move |ctx, _input: serde_json::Value| {
        let d = d.clone();
        async move {
            let dir = d.work_dir(WorkDirKind::Deployment, &ctx.workflow_id);
            let mut residue = Vec::new();
            scan_residue(&dir, &mut residue)?;
            if residue.is_empty() {
                Ok(())
            } else {
                Err(OrbitError::internal(format!(
                    "generator left residue: {}",
                    residue.join(", ")
                )))
            }
        }
    });

    let d = deps.clone();
    reg.register("deployment.commit", move |ctx, input: CommitInput| {
        let d = d.clone();
        async move {
            let dir = d.work_dir(WorkDirKind::Deployment, &ctx.workflow_id);
            let commit_sha = d
                .git
                .commit_all(&dir, &input.message, &GitIdentity::service(), input.started_at)
                .await?;
            Ok(CommitResult { commit_sha })
        }
    });

    let d = deps.clone();
    reg.register("deployment.push", move |ctx, input: PushInput| {
        let d = d.clone();
        async move {
            let dir = d.work_dir(WorkDirKind::Deployment, &ctx.workflow_id);
            let outcome = d.git.push(&dir, "origin", &input.branch).await?;
            Ok(PushResult {
                pushed: outcome == PushOutcome::Pushed,
            })
        }
    });

    let d = deps.clone();
    reg.register("deployment.rebase", move |ctx, _input: serde_json::Value| {
        let d = d.clone();
        async move {
            let dir = d.work_dir(WorkDirKind::Deployment, &ctx.workflow_id);
            d.git.fetch(&dir, "origin").await?;
            d.git.rebase(&dir, "origin/main").await
        }
    });

    let d = deps.clone();
    reg.register(
        "deployment.update_status",
        move |_ctx, input: UpdateDeploymentStatusInput| {
            let d = d.clone();
            async move {
                d.cms
                    .create(
                        collections::DEPLOYMENTS,
                        serde_json::json!({
                            "app": input.app_id,
                            "status": input.status,
                            "commitSha": input.commit_sha,
                            "errorCode": input.error_code,
                        }),
                    )
                    .await?;
                Ok(())
            }
        },
    );
}

fn scan_residue(dir: &std::path::Path, residue: &mut Vec<String>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            scan_residue(&path, residue)?;
        } else if path
            .extension()
            .map(|ext| ext == "tmp" || ext == "swp")
            .unwrap_or(false)
        {
            residue.push(path.display().to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_is_deterministic_for_equal_contexts() {
        let context = GeneratorContext {
            app_id: "a1".into(),
            app_slug: "payments".into(),
            workspace_slug: "acme".into(),
            generated_at: "2026-03-01T12:00:00Z".parse().unwrap(),
            workflow_id: "deployment:a1:1".into(),
            values: BTreeMap::from([("replicas".to_string(), "2".to_string())]),
        };
        assert_eq!(render_manifest(&context), render_manifest(&context.clone()));
        assert!(render_manifest(&context).contains("app: payments"));
    }

    #[test]
    fn residue_scan_flags_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orbit.yaml"), "ok").unwrap();
        std::fs::write(dir.path().join("leftover.tmp"), "junk").unwrap();

        let mut residue = Vec::new();
        scan_residue(dir.path(), &mut residue).unwrap();
        assert_eq!(residue.len(), 1);
        assert!(residue[0].ends_with("leftover.tmp"));
    }
}
