use std::path::PathBuf;
use std::sync::Arc;

use orbit_clients::{BifrostAdmin, BuildService, Cms, Git, GithubApi, ObjectStore};
use orbit_core::WorkerSettings;

use crate::services::TokenService;

/// Which configured base directory a working tree lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkDirKind {
    Git,
    Template,
    Deployment,
}

/// Everything activity handlers capture: the adapters, the domain
/// services, and the worker settings. Built once at startup and shared.
pub struct WorkerDeps {
    pub cms: Arc<dyn Cms>,
    pub github: Arc<dyn GithubApi>,
    pub bifrost: Arc<dyn BifrostAdmin>,
    pub store: Arc<dyn ObjectStore>,
    pub builds: Arc<dyn BuildService>,
    pub git: Arc<dyn Git>,
    pub tokens: Arc<TokenService>,
    pub settings: Arc<WorkerSettings>,
    /// Plain HTTP client for health probes.
    pub probe: reqwest::Client,
}

impl WorkerDeps {
    /// Working directory for one run: keyed by workflow id, so the tree is
    /// exclusively owned by that run and stable across replays.
    pub fn work_dir(&self, kind: WorkDirKind, workflow_id: &str) -> PathBuf {
        let base = match kind {
            WorkDirKind::Git => &self.settings.work_dirs.git,
            WorkDirKind::Template => &self.settings.work_dirs.template,
            WorkDirKind::Deployment => &self.settings.work_dirs.deployment,
        };
        base.join(sanitize_path_component(workflow_id))
    }
}

fn sanitize_path_component(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_ids_become_safe_path_components() {
        assert_eq!(
            sanitize_path_component("template-instantiation:job/1"),
            "template-instantiation-job-1"
        );
        assert_eq!(sanitize_path_component("build:app-1:2"), "build-app-1-2");
    }
}
