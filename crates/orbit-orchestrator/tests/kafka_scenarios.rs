//! Kafka-plane scenarios: virtual-cluster fan-out, credential round
//! trips, topic provisioning with schema compensation, event-sync
//! idempotency, and access shares.

mod common;

use orbit_core::workflow::{WorkflowId, WorkflowStatus};
use orbit_orchestrator::workflows::credential::{CredentialInput, CredentialOutput};
use orbit_orchestrator::workflows::topic::{TopicCreatedEvent, TopicWorkflowInput};
use orbit_orchestrator::workflows::virtual_cluster::{ProvisionInput, ProvisionSummary};
use orbit_orchestrator::workflows::{
    AccessProvisioningWorkflow, AccessRevocationWorkflow, CredentialRevokeWorkflow,
    CredentialUpsertWorkflow, TopicCreatedSyncWorkflow, TopicProvisioningWorkflow,
    VirtualClusterProvisionWorkflow,
};
use orbit_runtime::engine::Engine;
use orbit_runtime::testing::decode_output;

use common::harness;

#[tokio::test(start_paused = true)]
async fn fan_out_provisions_all_environments() {
    let h = harness();
    h.seed_app("a1", "ws1");

    let record = h
        .engine
        .run_to_end::<VirtualClusterProvisionWorkflow>(
            WorkflowId::derive("virtual-cluster-provision", "a1"),
            ProvisionInput {
                app_id: "a1".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Completed);
    let summary: ProvisionSummary = decode_output(&record).unwrap();
    assert_eq!(summary.app_status, "provisioned");
    assert!(summary.outcomes.iter().all(|o| o.succeeded));

    assert_eq!(
        h.bifrost.cluster_names(),
        vec![
            "acme-payments-dev".to_string(),
            "acme-payments-prod".to_string(),
            "acme-payments-stage".to_string(),
        ]
    );
    assert_eq!(h.cms.all("virtual-clusters").len(), 3);
    assert_eq!(h.app_status("a1"), "provisioned");
}

#[tokio::test(start_paused = true)]
async fn partial_failure_compensates_and_reports() {
    let h = harness();
    h.seed_app("a1", "ws1");
    h.bifrost.set_environment_down("prod");

    let record = h
        .engine
        .run_to_end::<VirtualClusterProvisionWorkflow>(
            WorkflowId::derive("virtual-cluster-provision", "a1"),
            ProvisionInput {
                app_id: "a1".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Completed);
    let summary: ProvisionSummary = decode_output(&record).unwrap();
    assert_eq!(summary.app_status, "partially_provisioned");

    let prod = summary
        .outcomes
        .iter()
        .find(|o| o.environment == "prod")
        .unwrap();
    assert!(!prod.succeeded);
    assert_eq!(prod.error_code.as_deref(), Some("BIFROST_UNAVAILABLE"));

    // The prod child compensated: its CMS record is gone, the other two
    // are active and mirrored in Bifrost.
    let records = h.cms.all("virtual-clusters");
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r["status"] == "active" && r["environment"] != "prod"));
    assert_eq!(h.bifrost.cluster_names().len(), 2);

    // Child terminal state carries the coded failure.
    let child = h
        .engine
        .get_run("virtual-cluster-provision-env:a1:prod")
        .await
        .unwrap();
    assert_eq!(child.status, WorkflowStatus::Failed);
    assert_eq!(child.error.unwrap().code, "BIFROST_UNAVAILABLE");

    assert_eq!(h.app_status("a1"), "partially_provisioned");
}

#[tokio::test(start_paused = true)]
async fn all_environments_failing_is_terminal() {
    let h = harness();
    h.seed_app("a1", "ws1");
    h.bifrost.set_down(true);

    let record = h
        .engine
        .run_to_end::<VirtualClusterProvisionWorkflow>(
            WorkflowId::derive("virtual-cluster-provision", "a1"),
            ProvisionInput {
                app_id: "a1".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Failed);
    assert_eq!(record.error.unwrap().code, "ALL_ENVIRONMENTS_FAILED");
    assert!(h.cms.all("virtual-clusters").is_empty());
}

fn seed_credential(h: &common::Harness) -> String {
    h.cms.insert(
        "credentials",
        serde_json::json!({
            "id": "cred-1",
            "app": "a1",
            "principal": "svc-payments",
            "cluster": "acme-payments-dev",
            "scopes": ["read", "write"],
            "hashedSecret": "sha256:xyz",
            "status": "pending",
        }),
    )
}

#[tokio::test(start_paused = true)]
async fn credential_upsert_revoke_upsert_round_trip() {
    let h = harness();
    let cred_id = seed_credential(&h);

    let upsert = h
        .engine
        .run_to_end::<CredentialUpsertWorkflow>(
            WorkflowId::derive("credential-upsert", &cred_id),
            CredentialInput {
                cred_id: cred_id.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(upsert.status, WorkflowStatus::Completed);
    let output: CredentialOutput = decode_output(&upsert).unwrap();
    assert_eq!(output.status, "active");
    assert_eq!(
        h.bifrost.credential_keys(),
        vec!["acme-payments-dev/svc-payments".to_string()]
    );

    let revoke = h
        .engine
        .run_to_end::<CredentialRevokeWorkflow>(
            WorkflowId::derive("credential-revoke", &cred_id),
            CredentialInput {
                cred_id: cred_id.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(revoke.status, WorkflowStatus::Completed);
    // Revocation terminality: the credential is gone from Bifrost and the
    // CMS row reads revoked.
    assert!(h.bifrost.credential_keys().is_empty());
    assert_eq!(
        h.cms.document("credentials", &cred_id).unwrap()["status"],
        "revoked"
    );

    // A later upsert re-activates: active → revoked → active.
    let again = h
        .engine
        .run_to_end::<CredentialUpsertWorkflow>(
            // New logical attempt: the first upsert run already closed.
            WorkflowId::derive_attempt("credential-upsert", &cred_id, 2),
            CredentialInput {
                cred_id: cred_id.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(again.status, WorkflowStatus::Completed);
    assert_eq!(
        h.cms.document("credentials", &cred_id).unwrap()["status"],
        "active"
    );
    assert_eq!(h.bifrost.credential_keys().len(), 1);
}

fn seed_topic(h: &common::Harness, schema: Option<&str>) -> String {
    h.cms.insert(
        "topics",
        serde_json::json!({
            "id": "topic-1",
            "virtualCluster": "acme-payments-dev",
            "name": "orders",
            "partitions": 6,
            "config": {"retention.ms": "86400000"},
            "schemaDefinition": schema,
            "status": "pending",
        }),
    )
}

#[tokio::test(start_paused = true)]
async fn topic_provisioning_registers_schema_then_topic() {
    let h = harness();
    let topic_id = seed_topic(&h, Some(r#"{"type": "record", "fields": []}"#));

    let record = h
        .engine
        .run_to_end::<TopicProvisioningWorkflow>(
            WorkflowId::derive("topic-provisioning", &topic_id),
            TopicWorkflowInput {
                topic_id: topic_id.clone(),
            },
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Completed);
    assert_eq!(h.bifrost.schema_count(), 1);
    assert_eq!(
        h.bifrost.topic_names(),
        vec!["acme-payments-dev/orders".to_string()]
    );
    let doc = h.cms.document("topics", &topic_id).unwrap();
    assert_eq!(doc["status"], "active");
    assert_eq!(doc["schemaId"], "sch-1");
}

#[tokio::test(start_paused = true)]
async fn failed_topic_creation_compensates_schema() {
    let h = harness();
    let topic_id = seed_topic(&h, Some(r#"{"type": "record", "fields": []}"#));
    // Exhaust every retry attempt of the provision activity.
    h.bifrost.fail_next_topic_creates(8);

    let record = h
        .engine
        .run_to_end::<TopicProvisioningWorkflow>(
            WorkflowId::derive("topic-provisioning", &topic_id),
            TopicWorkflowInput {
                topic_id: topic_id.clone(),
            },
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Failed);
    // The registered schema was unregistered by the compensation pass.
    assert_eq!(h.bifrost.schema_count(), 0);
    assert!(h.bifrost.topic_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn topic_created_sync_deduplicates_by_event_fingerprint() {
    let h = harness();
    let event = TopicCreatedEvent {
        virtual_cluster_id: "vc-1".into(),
        name: "orders".into(),
        partitions: Some(3),
        config: Default::default(),
    };
    let payload = serde_json::to_value(&event).unwrap();
    let workflow_id = WorkflowId::derive_fingerprint("topic-created-sync", "vc-1", &payload);

    let first = h
        .engine
        .run_to_end::<TopicCreatedSyncWorkflow>(workflow_id.clone(), event.clone())
        .await
        .unwrap();
    assert_eq!(first.status, WorkflowStatus::Completed);

    // Replay of the same event inside the dedup window lands on the same
    // run; no second record appears.
    let replay = h
        .engine
        .start::<TopicCreatedSyncWorkflow>(workflow_id.clone(), event.clone())
        .await
        .unwrap();
    assert!(!replay.started_new_run());
    assert_eq!(h.cms.all("topics").len(), 1);

    // Even a fresh run with the same payload only updates the record.
    let second = h
        .engine
        .run_to_end::<TopicCreatedSyncWorkflow>(
            WorkflowId::derive("topic-created-sync", "vc-1:replayed"),
            event,
        )
        .await
        .unwrap();
    assert_eq!(second.status, WorkflowStatus::Completed);
    assert_eq!(h.cms.all("topics").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn access_share_provision_and_revoke() {
    let h = harness();
    let share_id = h.cms.insert(
        "shares",
        serde_json::json!({
            "id": "share-1",
            "sourceCluster": "acme-payments-dev",
            "targetPrincipal": "svc-billing",
            "scopes": ["read"],
            "status": "pending",
        }),
    );

    let provision = h
        .engine
        .run_to_end::<AccessProvisioningWorkflow>(
            WorkflowId::derive("access-provisioning", &share_id),
            orbit_orchestrator::workflows::access::AccessInput {
                share_id: share_id.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(provision.status, WorkflowStatus::Completed);
    assert_eq!(h.bifrost.share_ids(), vec![share_id.clone()]);
    assert_eq!(h.cms.document("shares", &share_id).unwrap()["status"], "active");

    let revoke = h
        .engine
        .run_to_end::<AccessRevocationWorkflow>(
            WorkflowId::derive("access-revocation", &share_id),
            orbit_orchestrator::workflows::access::AccessInput {
                share_id: share_id.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(revoke.status, WorkflowStatus::Completed);
    assert!(h.bifrost.share_ids().is_empty());
    assert_eq!(h.cms.document("shares", &share_id).unwrap()["status"], "revoked");
}
