//! Template-instantiation activities: input validation, repository
//! creation, variable application, finalization.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use orbit_clients::payload::{collections, get_as};
use orbit_clients::{GenerateRequest, RepoRef};
use orbit_core::activity::ActivityRegistry;
use orbit_core::{OrbitError, Result};

use crate::deps::{WorkDirKind, WorkerDeps};
use crate::records::TemplateRecord;
use crate::services::template as template_engine;

static REPO_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_-]{1,100}$").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateInstantiationInput {
    pub template_id: String,
    pub workspace_id: String,
    pub target_org: String,
    pub repository_name: String,
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFromTemplateInput {
    pub template_id: String,
    pub target_org: String,
    pub repository_name: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEmptyRepoInput {
    pub target_org: String,
    pub repository_name: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyVariablesInput {
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeInput {
    pub template_id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub repo: RepoRef,
    #[serde(default)]
    pub commit_sha: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeResult {
    pub repository_url: String,
    pub repository_doc_id: String,
}

pub(crate) fn validate(input: &ValidateInstantiationInput) -> Result<()> {
    if input.template_id.trim().is_empty() {
        return Err(OrbitError::validation("template id must not be empty"));
    }
    if input.workspace_id.trim().is_empty() {
        return Err(OrbitError::validation("workspace id must not be empty"));
    }
    if input.target_org.trim().is_empty() {
        return Err(OrbitError::validation("target org must not be empty"));
    }
    if !REPO_NAME_PATTERN.is_match(&input.repository_name) {
        return Err(OrbitError::validation(format!(
            "repository name {:?} must match [a-z0-9_-]{{1,100}}",
            input.repository_name
        )));
    }
    template_engine::validate_variable_keys(&input.variables)
}

pub fn register(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    reg.register(
        "template.validate",
        move |_ctx, input: ValidateInstantiationInput| async move { validate(&input) },
    );

    let d = deps.clone();
    reg.register("template.create_from_template", move |_ctx, input: CreateFromTemplateInput| {
        let d = d.clone();
        async move {
            let template: TemplateRecord = get_as(
                d.cms.as_ref(),
                collections::TEMPLATES,
                &input.template_id,
            )
            .await?;
            d.github
                .generate_from_template(GenerateRequest {
                    template_owner: template.source_owner,
                    template_repo: template.source_repo,
                    owner: input.target_org,
                    name: input.repository_name,
                    private: true,
                    token: input.token,
                })
                .await
        }
    });

    let d = deps.clone();
    reg.register("template.create_empty_repo", move |_ctx, input: CreateEmptyRepoInput| {
        let d = d.clone();
        async move {
            d.github
                .create_org_repo(&input.target_org, &input.repository_name, true, &input.token)
                .await
        }
    });

    let d = deps.clone();
    reg.register("template.apply_variables", move |ctx, input: ApplyVariablesInput| {
        let d = d.clone();
        async move {
            let dir = d.work_dir(WorkDirKind::Template, &ctx.workflow_id);
            tokio::task::spawn_blocking(move || {
                template_engine::apply_variables(&dir, &input.variables)
            })
            .await
            .map_err(|e| OrbitError::internal(format!("variable application panicked: {e}")))?
        }
    });

    let d = deps.clone();
    reg.register("template.finalize", move |_ctx, input: FinalizeInput| {
        let d = d.clone();
        async move {
            let doc = d
                .cms
                .create(
                    collections::REPOSITORIES,
                    serde_json::json!({
                        "workspace": input.workspace_id,
                        "template": input.template_id,
                        "createdBy": input.user_id,
                        "name": input.repo.name,
                        "org": input.repo.owner,
                        "gitUrl": input.repo.html_url,
                        "cloneUrl": input.repo.clone_url,
                        "initialCommit": input.commit_sha,
                    }),
                )
                .await?;
            let repository_doc_id = doc
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(FinalizeResult {
                repository_url: input.repo.html_url,
                repository_doc_id,
            })
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_input() -> ValidateInstantiationInput {
        ValidateInstantiationInput {
            template_id: "tpl-go-svc".into(),
            workspace_id: "ws1".into(),
            target_org: "acme".into(),
            repository_name: "payments".into(),
            variables: BTreeMap::from([("service_name".to_string(), "payments".to_string())]),
        }
    }

    #[test]
    fn accepts_valid_input() {
        assert!(validate(&valid_input()).is_ok());
    }

    #[test]
    fn rejects_bad_repo_names() {
        for bad in ["", "Has-Upper", "has space", "ünïcode", &"x".repeat(101)] {
            let mut input = valid_input();
            input.repository_name = bad.to_string();
            assert!(validate(&input).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn rejects_empty_identifiers() {
        let mut input = valid_input();
        input.template_id = "  ".into();
        assert!(validate(&input).is_err());

        let mut input = valid_input();
        input.target_org = String::new();
        assert!(validate(&input).is_err());
    }

    #[test]
    fn rejects_malformed_variable_keys() {
        let mut input = valid_input();
        input.variables.insert("bad key!".into(), "v".into());
        assert!(validate(&input).is_err());
    }
}
