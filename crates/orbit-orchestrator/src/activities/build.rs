//! Build activities: quota accounting, repository analysis, the
//! build-service call, image tracking, and the always-written final
//! status.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use orbit_clients::payload::{collections, get_as, Filter};
use orbit_clients::{authenticated_clone_url, BuildEvent, BuildRequest};
use orbit_core::activity::ActivityRegistry;
use orbit_core::{OrbitError, Result};

use crate::deps::{WorkDirKind, WorkerDeps};
use crate::records::ApplicationRecord;
use crate::services::detect::{detect, DetectedBuildConfig, Detection};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckQuotaInput {
    pub app_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaReport {
    pub in_use: u32,
    pub quota: u32,
    pub evicted: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRepositoryInput {
    pub app_id: String,
    pub git_ref: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistChoicesInput {
    pub app_id: String,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBuildInput {
    pub app_id: String,
    pub git_ref: String,
    pub token: String,
    pub registry_ref: String,
    pub config: DetectedBuildConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltImage {
    pub image_ref: String,
    pub digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackImageInput {
    pub app_id: String,
    pub image_ref: String,
    pub digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBuildStatusInput {
    pub app_id: String,
    pub status: String,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
}

async fn app_clone_url(deps: &WorkerDeps, app_id: &str) -> Result<String> {
    let app: ApplicationRecord =
        get_as(deps.cms.as_ref(), collections::APPLICATIONS, app_id).await?;
    app.clone_url
        .or(app.git_url)
        .ok_or_else(|| OrbitError::validation(format!("application {app_id} has no repository")))
}

pub fn register(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    let d = deps.clone();
    reg.register("build.check_quota", move |_ctx, input: CheckQuotaInput| {
        let d = d.clone();
        async move {
            let quota = d.settings.build.quota;
            let images = d
                .cms
                .find(
                    collections::TRACKED_IMAGES,
                    &Filter::new().eq("app", &input.app_id).sort("createdAt"),
                )
                .await?;

            let mut evicted = 0u32;
            let mut in_use = images.len() as u32;
            // Oldest untracked images go first.
            for image in &images {
                if in_use < quota {
                    break;
                }
                if image.get("status").and_then(|s| s.as_str()) == Some("untracked") {
                    if let Some(id) = image.get("id").and_then(|v| v.as_str()) {
                        d.cms.delete(collections::TRACKED_IMAGES, id).await?;
                        evicted += 1;
                        in_use -= 1;
                    }
                }
            }

            if in_use >= quota {
                return Err(OrbitError::quota_exceeded(format!(
                    "application {} holds {in_use} images of a {quota} quota",
                    input.app_id
                )));
            }
            Ok(QuotaReport {
                in_use,
                quota,
                evicted,
            })
        }
    });

    let d = deps.clone();
    reg.register("build.analyze_repository", move |ctx, input: AnalyzeRepositoryInput| {
        let d = d.clone();
        async move {
            let clone_url = app_clone_url(&d, &input.app_id).await?;
            let url = authenticated_clone_url(&clone_url, &input.token);
            let dir = d.work_dir(WorkDirKind::Git, &ctx.workflow_id);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            d.git.clone_repo(&url, &dir, Some(1)).await?;

            let detection_dir = dir.clone();
            let detection: Result<Detection> =
                tokio::task::spawn_blocking(move || detect(&detection_dir))
                    .await
                    .map_err(|e| OrbitError::internal(format!("analysis panicked: {e}")))?;

            // The analysis tree is activity-local; drop it before returning.
            let _ = std::fs::remove_dir_all(&dir);
            detection
        }
    });

    let d = deps.clone();
    reg.register("build.persist_choices", move |_ctx, input: PersistChoicesInput| {
        let d = d.clone();
        async move {
            d.cms
                .patch(
                    collections::APPLICATIONS,
                    &input.app_id,
                    serde_json::json!({ "availableChoices": input.candidates }),
                )
                .await?;
            Ok(())
        }
    });

    let d = deps.clone();
    reg.register("build.run", move |ctx, input: RunBuildInput| {
        let d = d.clone();
        async move {
            let clone_url = app_clone_url(&d, &input.app_id).await?;
            let mut stream = d
                .builds
                .build(BuildRequest {
                    app_id: input.app_id.clone(),
                    git_url: clone_url,
                    token: input.token,
                    registry_ref: input.registry_ref,
                    config: serde_json::to_value(&input.config)?,
                })
                .await?;

            // Forward builder ticks as activity heartbeats; a cancellation
            // answer aborts the wait.
            while let Some(event) = stream.next().await {
                match event? {
                    BuildEvent::Heartbeat { message } => {
                        tracing::debug!(app_id = %input.app_id, %message, "build progress");
                        ctx.heartbeat().await?;
                    }
                    BuildEvent::Completed { image_ref, digest } => {
                        return Ok(BuiltImage { image_ref, digest });
                    }
                }
            }
            Err(OrbitError::transient(
                "build stream ended without a completion event",
            ))
        }
    });

    let d = deps.clone();
    reg.register("build.track_image", move |_ctx, input: TrackImageInput| {
        let d = d.clone();
        async move {
            d.cms
                .create(
                    collections::TRACKED_IMAGES,
                    serde_json::json!({
                        "app": input.app_id,
                        "imageRef": input.image_ref,
                        "digest": input.digest,
                        "status": "tracked",
                    }),
                )
                .await?;
            Ok(())
        }
    });

    let d = deps.clone();
    reg.register("build.update_status", move |_ctx, input: UpdateBuildStatusInput| {
        let d = d.clone();
        async move {
            d.cms
                .update_build_status(
                    &input.app_id,
                    serde_json::json!({
                        "status": input.status,
                        "errorCode": input.error_code,
                        "imageRef": input.image_ref,
                    }),
                )
                .await
        }
    });
}
