//! Deployment scenarios: the happy path, the single rebase, and the
//! terminal merge conflict.

mod common;

use orbit_core::workflow::{WorkflowId, WorkflowStatus};
use orbit_orchestrator::workflows::deployment::{DeploymentInput, DeploymentOutput};
use orbit_orchestrator::workflows::DeploymentWorkflow;
use orbit_runtime::testing::decode_output;

use common::harness;

fn input() -> DeploymentInput {
    DeploymentInput {
        app_id: "a1".into(),
        workspace_id: "ws1".into(),
        git_ref: "main".into(),
    }
}

fn seed(h: &common::Harness) {
    h.seed_app("a1", "ws1");
    h.seed_fresh_installation("ws1");
    h.git.stage_template(
        &h.authenticated_app_url("ghs_test"),
        &[("README.md", "# payments\n")],
    );
}

#[tokio::test(start_paused = true)]
async fn deploys_generated_manifest() {
    let h = harness();
    seed(&h);

    let record = h
        .engine
        .run_to_end::<DeploymentWorkflow>(
            WorkflowId::derive_attempt("deployment", "a1", 1),
            input(),
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Completed);
    let output: DeploymentOutput = decode_output(&record).unwrap();
    assert_eq!(output.commit_sha.len(), 40);

    // One commit, one push, no rebase needed.
    assert_eq!(h.git.commits().len(), 1);
    assert_eq!(h.git.pushes().len(), 1);
    assert_eq!(h.git.rebase_count(), 0);

    let deployments = h.cms.all("deployments");
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0]["status"], "deployed");

    // Work dir cleaned on completion.
    assert!(!h
        .settings
        .work_dirs
        .deployment
        .join("deployment-a1-1")
        .exists());
}

#[tokio::test(start_paused = true)]
async fn rejected_push_rebases_exactly_once() {
    let h = harness();
    seed(&h);
    h.git.reject_next_pushes(1);

    let record = h
        .engine
        .run_to_end::<DeploymentWorkflow>(
            WorkflowId::derive_attempt("deployment", "a1", 2),
            input(),
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Completed);
    assert_eq!(h.git.rebase_count(), 1);
    assert_eq!(h.git.pushes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_rejection_is_merge_conflict() {
    let h = harness();
    seed(&h);
    h.git.reject_next_pushes(2);

    let record = h
        .engine
        .run_to_end::<DeploymentWorkflow>(
            WorkflowId::derive_attempt("deployment", "a1", 3),
            input(),
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Failed);
    assert_eq!(record.error.unwrap().code, "MERGE_CONFLICT");

    let deployments = h.cms.all("deployments");
    assert_eq!(deployments.last().unwrap()["status"], "failed");
    assert_eq!(deployments.last().unwrap()["errorCode"], "MERGE_CONFLICT");
}

#[tokio::test(start_paused = true)]
async fn conflicted_rebase_is_merge_conflict() {
    let h = harness();
    seed(&h);
    h.git.reject_next_pushes(1);
    h.git.set_rebase_conflicts(true);

    let record = h
        .engine
        .run_to_end::<DeploymentWorkflow>(
            WorkflowId::derive_attempt("deployment", "a1", 4),
            input(),
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Failed);
    assert_eq!(record.error.unwrap().code, "MERGE_CONFLICT");
}

#[tokio::test(start_paused = true)]
async fn deleted_app_refuses_deployment() {
    let h = harness();
    h.seed_fresh_installation("ws1");
    h.cms.insert(
        "applications",
        serde_json::json!({
            "id": "a1",
            "name": "Payments",
            "slug": "payments",
            "workspace": "ws1",
            "workspaceSlug": "acme",
            "status": "pending_deletion",
            "cloneUrl": "https://github.com/acme/payments.git",
        }),
    );

    let record = h
        .engine
        .run_to_end::<DeploymentWorkflow>(
            WorkflowId::derive_attempt("deployment", "a1", 5),
            input(),
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Failed);
    assert_eq!(record.error.unwrap().kind, "VALIDATION");
}
