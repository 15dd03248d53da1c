//! Decommissioning scenarios: the grace-window cancel and the full
//! delayed cleanup.

mod common;

use std::time::Duration;

use chrono::Utc;
use orbit_clients::{BifrostAdmin, IdempotencyKey, VirtualClusterSpec};
use orbit_core::workflow::{WorkflowId, WorkflowStatus};
use orbit_orchestrator::workflows::decommission::{DecommissionInput, DecommissionOutput};
use orbit_orchestrator::workflows::ApplicationDecommissioningWorkflow;
use orbit_runtime::engine::Engine;
use orbit_runtime::testing::decode_output;

use common::harness;

async fn seed_decommissionable_app(h: &common::Harness) {
    h.cms.insert(
        "applications",
        serde_json::json!({
            "id": "a1",
            "name": "Payments",
            "slug": "payments",
            "workspace": "ws1",
            "workspaceSlug": "acme",
            "status": "archived",
        }),
    );
    h.cms.insert(
        "virtual-clusters",
        serde_json::json!({
            "id": "vc-1",
            "app": "a1",
            "environment": "dev",
            "logicalName": "acme-payments-dev",
            "status": "active",
            "bifrostRef": "bif-acme-payments-dev",
        }),
    );
    h.cms.insert(
        "topics",
        serde_json::json!({
            "id": "topic-1",
            "virtualCluster": "vc-1",
            "name": "orders",
            "status": "active",
        }),
    );
    h.cms.insert(
        "credentials",
        serde_json::json!({
            "id": "cred-1",
            "app": "a1",
            "principal": "svc-payments",
            "cluster": "acme-payments-dev",
            "scopes": ["read"],
            "hashedSecret": "sha256:xyz",
            "status": "active",
        }),
    );
    h.cms.insert(
        "lineage-edges",
        serde_json::json!({
            "id": "edge-1",
            "producerApp": "a1",
            "topic": "orders",
            "consumerApp": "a2",
            "lastSeen": Utc::now(),
            "activity24h": 10,
            "status": "active",
        }),
    );

    // Mirror the CMS state into Bifrost.
    h.bifrost
        .create_virtual_cluster(
            VirtualClusterSpec {
                logical_name: "acme-payments-dev".into(),
                environment: "dev".into(),
                app_id: "a1".into(),
                workspace: "ws1".into(),
            },
            IdempotencyKey::derive("seed", "vc", "test"),
        )
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn decommission_archives_and_schedules_cleanup() {
    let h = harness();
    seed_decommissionable_app(&h).await;

    let record = h
        .engine
        .run_to_end::<ApplicationDecommissioningWorkflow>(
            WorkflowId::derive("app-decommission", "a1"),
            DecommissionInput {
                app_id: "a1".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Completed);
    let output: DecommissionOutput = decode_output(&record).unwrap();
    assert_eq!(output.cleanup_workflow_id, "app-cleanup:a1");
    assert_eq!(output.credentials_revoked, 1);

    // Writes stopped, app flagged, archive blob content-addressed.
    assert!(h.bifrost.cluster("acme-payments-dev").unwrap().read_only);
    assert_eq!(h.app_status("a1"), "pending_deletion");
    assert!(output.archive.object_key.starts_with("archives/a1/"));
    assert!(h.store.keys().contains(&output.archive.object_key));

    // The cleanup run is open and sitting in its grace window.
    let cleanup = h.engine.get_run("app-cleanup:a1").await.unwrap();
    assert_eq!(cleanup.status, WorkflowStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn cancel_inside_grace_window_reverts_and_keeps_archive() {
    let h = harness();
    seed_decommissionable_app(&h).await;

    let record = h
        .engine
        .run_to_end::<ApplicationDecommissioningWorkflow>(
            WorkflowId::derive("app-decommission", "a1"),
            DecommissionInput {
                app_id: "a1".into(),
            },
        )
        .await
        .unwrap();
    let output: DecommissionOutput = decode_output(&record).unwrap();

    // Three days into the seven-day window, the user changes their mind.
    tokio::time::advance(Duration::from_secs(3 * 24 * 3600)).await;
    h.engine.cancel_workflow("app-cleanup:a1").await.unwrap();

    let cleanup = h.engine.await_closed("app-cleanup:a1").await;
    assert_eq!(cleanup.status, WorkflowStatus::Cancelled);

    // Status reverted, schedule cleared, archive retained, Kafka
    // footprint untouched.
    let app = h.cms.document("applications", "a1").unwrap();
    assert_eq!(app["status"], "archived");
    assert!(app["deletionScheduledAt"].is_null());
    assert!(h.store.keys().contains(&output.archive.object_key));
    assert!(h.bifrost.cluster("acme-payments-dev").is_some());
    assert_eq!(h.cms.all("virtual-clusters").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cleanup_after_grace_removes_the_kafka_footprint() {
    let h = harness();
    seed_decommissionable_app(&h).await;

    h.engine
        .run_to_end::<ApplicationDecommissioningWorkflow>(
            WorkflowId::derive("app-decommission", "a1"),
            DecommissionInput {
                app_id: "a1".into(),
            },
        )
        .await
        .unwrap();

    // Let the grace window elapse; the cleanup run drains everything.
    let cleanup = h.engine.await_closed("app-cleanup:a1").await;
    assert_eq!(cleanup.status, WorkflowStatus::Completed);

    assert!(h.bifrost.cluster("acme-payments-dev").is_none());
    assert!(h.bifrost.topic_names().is_empty());
    assert!(h.cms.all("virtual-clusters").is_empty());
    assert!(h.cms.all("topics").is_empty());
    assert!(h.cms.all("credentials").is_empty());
    assert_eq!(h.app_status("a1"), "deleted");

    // Archives survive physical cleanup.
    assert!(!h.store.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn non_archived_app_is_refused() {
    let h = harness();
    h.seed_app("a1", "ws1"); // status "active"

    let record = h
        .engine
        .run_to_end::<ApplicationDecommissioningWorkflow>(
            WorkflowId::derive("app-decommission", "a1"),
            DecommissionInput {
                app_id: "a1".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Failed);
    assert_eq!(record.error.unwrap().kind, "VALIDATION");
    assert_eq!(h.app_status("a1"), "active");
}
