//! Git working-tree activities. Every tree is keyed by the owning
//! workflow id; cleanup is the compensating step that always runs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orbit_clients::payload::{collections, get_as};
use orbit_clients::{authenticated_clone_url, GitIdentity, RepoRef};
use orbit_core::activity::ActivityRegistry;
use orbit_core::OrbitError;

use crate::deps::{WorkDirKind, WorkerDeps};
use crate::records::TemplateRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneTemplateInput {
    pub template_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneResult {
    pub work_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushToNewRepoInput {
    pub repo: RepoRef,
    pub token: String,
    /// Workflow start time; pins author/committer dates so replays keep
    /// the commit hash.
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushedCommit {
    pub commit_sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupWorkDirInput {
    pub kind: WorkDirKind,
}

pub fn register(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    let d = deps.clone();
    reg.register("git.clone_template", move |ctx, input: CloneTemplateInput| {
        let d = d.clone();
        async move {
            let template: TemplateRecord = get_as(
                d.cms.as_ref(),
                collections::TEMPLATES,
                &input.template_id,
            )
            .await?;
            let clone_url = template.clone_url.unwrap_or_else(|| {
                format!(
                    "https://github.com/{}/{}.git",
                    template.source_owner, template.source_repo
                )
            });
            let url = authenticated_clone_url(&clone_url, &input.token);
            let dir = d.work_dir(WorkDirKind::Template, &ctx.workflow_id);
            if dir.exists() {
                // A previous attempt left a tree behind; start clean.
                std::fs::remove_dir_all(&dir)?;
            }
            d.git.clone_repo(&url, &dir, None).await?;
            Ok(CloneResult {
                work_dir: dir.display().to_string(),
            })
        }
    });

    let d = deps.clone();
    reg.register("git.push_to_new_repo", move |ctx, input: PushToNewRepoInput| {
        let d = d.clone();
        async move {
            let dir = d.work_dir(WorkDirKind::Template, &ctx.workflow_id);
            if !dir.exists() {
                return Err(OrbitError::internal(format!(
                    "working tree {} missing before push",
                    dir.display()
                )));
            }
            // Fresh history: the template's history never reaches the new
            // repository.
            let git_meta = dir.join(".git");
            if git_meta.exists() {
                std::fs::remove_dir_all(&git_meta)?;
            }
            d.git.init_repo(&dir, "main").await?;
            let commit_sha = d
                .git
                .commit_all(
                    &dir,
                    "Initial commit",
                    &GitIdentity::service(),
                    input.started_at,
                )
                .await?;
            let remote = authenticated_clone_url(&input.repo.clone_url, &input.token);
            d.git.set_remote(&dir, "origin", &remote).await?;
            d.git.force_push(&dir, "origin", "main").await?;
            Ok(PushedCommit { commit_sha })
        }
    });

    let d = deps.clone();
    reg.register("git.cleanup_work_dir", move |ctx, input: CleanupWorkDirInput| {
        let d = d.clone();
        async move {
            let dir = d.work_dir(input.kind, &ctx.workflow_id);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(OrbitError::from(e)),
            }
        }
    });
}
