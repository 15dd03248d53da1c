use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use orbit_core::{OrbitError, Result};

/// Commit identity for service-authored commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl GitIdentity {
    pub fn service() -> Self {
        Self {
            name: "orbit-service".to_string(),
            email: "service@orbit.internal".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The remote moved; the caller decides whether to rebase.
    NonFastForward,
}

/// Git operations, driven through the `git` CLI.
#[async_trait]
pub trait Git: Send + Sync {
    async fn clone_repo(&self, url: &str, dest: &Path, depth: Option<u32>) -> Result<()>;
    async fn init_repo(&self, dir: &Path, default_branch: &str) -> Result<()>;
    async fn set_remote(&self, dir: &Path, name: &str, url: &str) -> Result<()>;
    /// Stage everything and commit with the given identity and pinned
    /// author/committer dates. Returns the commit hash.
    async fn commit_all(
        &self,
        dir: &Path,
        message: &str,
        identity: &GitIdentity,
        timestamp: DateTime<Utc>,
    ) -> Result<String>;
    async fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<PushOutcome>;
    async fn force_push(&self, dir: &Path, remote: &str, branch: &str) -> Result<()>;
    async fn fetch(&self, dir: &Path, remote: &str) -> Result<()>;
    /// Rebase the current branch onto `onto` (e.g. `origin/main`).
    async fn rebase(&self, dir: &Path, onto: &str) -> Result<()>;
}

pub struct CliGit;

impl CliGit {
    async fn run(
        &self,
        dir: Option<&Path>,
        envs: &[(&str, String)],
        args: &[&str],
    ) -> Result<String> {
        let mut cmd = Command::new("git");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        for (key, value) in envs {
            cmd.env(key, value);
        }
        cmd.args(args);

        let output = cmd
            .output()
            .await
            .map_err(|e| OrbitError::transient(format!("git {}: spawn failed: {e}", args.join(" "))))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_git_failure(args, &stderr))
    }
}

fn classify_git_failure(args: &[&str], stderr: &str) -> OrbitError {
    let summary = format!("git {} failed", args.first().copied().unwrap_or("?"));
    let lowered = stderr.to_lowercase();
    if lowered.contains("non-fast-forward") || lowered.contains("fetch first") {
        OrbitError::conflict(summary)
    } else if lowered.contains("authentication failed")
        || lowered.contains("permission denied")
        || lowered.contains("403")
    {
        OrbitError::permission_denied(summary)
    } else if lowered.contains("not found") || lowered.contains("does not exist") {
        OrbitError::not_found(summary)
    } else if lowered.contains("could not apply") || lowered.contains("merge conflict") {
        OrbitError::conflict(summary)
    } else {
        tracing::debug!(stderr = %stderr.trim(), "git failure");
        OrbitError::transient(summary)
    }
}

#[async_trait]
impl Git for CliGit {
    async fn clone_repo(&self, url: &str, dest: &Path, depth: Option<u32>) -> Result<()> {
        let dest_str = path_str(dest)?;
        let depth_arg;
        let mut args = vec!["clone"];
        if let Some(depth) = depth {
            depth_arg = format!("--depth={depth}");
            args.push(&depth_arg);
        }
        args.push(url);
        args.push(&dest_str);
        self.run(None, &[], &args).await.map(|_| ())
    }

    async fn init_repo(&self, dir: &Path, default_branch: &str) -> Result<()> {
        let branch_arg = format!("--initial-branch={default_branch}");
        self.run(Some(dir), &[], &["init", &branch_arg])
            .await
            .map(|_| ())
    }

    async fn set_remote(&self, dir: &Path, name: &str, url: &str) -> Result<()> {
        // `remote add` fails if the name exists; converge with set-url.
        if self
            .run(Some(dir), &[], &["remote", "add", name, url])
            .await
            .is_err()
        {
            self.run(Some(dir), &[], &["remote", "set-url", name, url])
                .await?;
        }
        Ok(())
    }

    async fn commit_all(
        &self,
        dir: &Path,
        message: &str,
        identity: &GitIdentity,
        timestamp: DateTime<Utc>,
    ) -> Result<String> {
        let date = timestamp.to_rfc3339();
        let envs = [
            ("GIT_AUTHOR_DATE", date.clone()),
            ("GIT_COMMITTER_DATE", date),
        ];
        let user_name = format!("user.name={}", identity.name);
        let user_email = format!("user.email={}", identity.email);

        self.run(Some(dir), &[], &["add", "-A"]).await?;
        self.run(
            Some(dir),
            &envs,
            &[
                "-c", &user_name, "-c", &user_email, "commit", "-m", message,
            ],
        )
        .await?;
        self.run(Some(dir), &[], &["rev-parse", "HEAD"]).await
    }

    async fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<PushOutcome> {
        match self.run(Some(dir), &[], &["push", remote, branch]).await {
            Ok(_) => Ok(PushOutcome::Pushed),
            Err(e) if e.kind == orbit_core::ErrorKind::Conflict => Ok(PushOutcome::NonFastForward),
            Err(e) => Err(e),
        }
    }

    async fn force_push(&self, dir: &Path, remote: &str, branch: &str) -> Result<()> {
        self.run(Some(dir), &[], &["push", "--force", remote, branch])
            .await
            .map(|_| ())
    }

    async fn fetch(&self, dir: &Path, remote: &str) -> Result<()> {
        self.run(Some(dir), &[], &["fetch", remote]).await.map(|_| ())
    }

    async fn rebase(&self, dir: &Path, onto: &str) -> Result<()> {
        match self.run(Some(dir), &[], &["rebase", onto]).await {
            Ok(_) => Ok(()),
            Err(e) => {
                // Leave the tree usable for the caller's next decision.
                let _ = self.run(Some(dir), &[], &["rebase", "--abort"]).await;
                Err(e)
            }
        }
    }
}

fn path_str(path: &Path) -> Result<String> {
    Ok(PathBuf::from(path)
        .into_os_string()
        .into_string()
        .map_err(|_| OrbitError::validation("work dir path is not valid UTF-8"))?)
}
