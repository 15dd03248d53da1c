//! Lineage ingest, aggregation, and snapshot scenarios.

mod common;

use chrono::{Duration, Utc};
use orbit_core::workflow::{WorkflowId, WorkflowStatus};
use orbit_orchestrator::activities::lineage::ActivityEvent;
use orbit_orchestrator::workflows::lineage::{
    ActivityBatchInput, AggregationOutput, MaintenanceWorkflowInput,
};
use orbit_orchestrator::workflows::{
    ActivityProcessingWorkflow, LineageAggregationWorkflow, ScheduledLineageMaintenanceWorkflow,
};
use orbit_runtime::testing::decode_output;

use common::harness;

fn event(producer: &str, topic: &str, consumer: &str, age_hours: i64) -> ActivityEvent {
    ActivityEvent {
        producer_app: producer.to_string(),
        topic: topic.to_string(),
        consumer_app: consumer.to_string(),
        observed_at: Utc::now() - Duration::hours(age_hours),
        count: 5,
    }
}

#[tokio::test(start_paused = true)]
async fn batches_upsert_edges_without_duplicates() {
    let h = harness();

    let first = h
        .engine
        .run_to_end::<ActivityProcessingWorkflow>(
            WorkflowId::derive("activity-processing", "batch-1"),
            ActivityBatchInput {
                batch_id: "batch-1".into(),
                events: vec![
                    event("a1", "orders", "a2", 0),
                    event("a1", "orders", "a3", 0),
                ],
            },
        )
        .await
        .unwrap();
    assert_eq!(first.status, WorkflowStatus::Completed);
    assert_eq!(h.cms.all("lineage-edges").len(), 2);

    // The same triple again only bumps counters.
    let second = h
        .engine
        .run_to_end::<ActivityProcessingWorkflow>(
            WorkflowId::derive("activity-processing", "batch-2"),
            ActivityBatchInput {
                batch_id: "batch-2".into(),
                events: vec![event("a1", "orders", "a2", 0)],
            },
        )
        .await
        .unwrap();
    assert_eq!(second.status, WorkflowStatus::Completed);

    let edges = h.cms.all("lineage-edges");
    assert_eq!(edges.len(), 2);
    let updated = edges
        .iter()
        .find(|e| e["consumerApp"] == "a2")
        .unwrap();
    assert_eq!(updated["activity24h"], 10);
}

#[tokio::test(start_paused = true)]
async fn aggregation_marks_stale_edges() {
    let h = harness();
    let now = Utc::now();
    h.cms.insert(
        "lineage-edges",
        serde_json::json!({
            "id": "edge-fresh",
            "producerApp": "a1", "topic": "orders", "consumerApp": "a2",
            "lastSeen": now - Duration::hours(1),
            "activity24h": 100,
            "status": "active",
        }),
    );
    h.cms.insert(
        "lineage-edges",
        serde_json::json!({
            "id": "edge-stale",
            "producerApp": "a1", "topic": "audit", "consumerApp": "a3",
            "lastSeen": now - Duration::hours(30),
            "activity24h": 7,
            "status": "active",
        }),
    );
    h.cms.insert(
        "lineage-edges",
        serde_json::json!({
            "id": "edge-dead",
            "producerApp": "a4", "topic": "legacy", "consumerApp": "a5",
            "lastSeen": now - Duration::days(45),
            "activity24h": 0,
            "status": "inactive",
        }),
    );

    let record = h
        .engine
        .run_to_end::<LineageAggregationWorkflow>(
            WorkflowId::derive("lineage-aggregation", "run-1"),
            MaintenanceWorkflowInput {
                reference_time: Some(now),
            },
        )
        .await
        .unwrap();
    assert_eq!(record.status, WorkflowStatus::Completed);
    let output: AggregationOutput = decode_output(&record).unwrap();
    assert_eq!(output.reset, 1);
    assert_eq!(output.inactive, 1);
    assert_eq!(output.archived, 1);

    let stale = h.cms.document("lineage-edges", "edge-stale").unwrap();
    assert_eq!(stale["status"], "inactive");
    assert_eq!(stale["activity24h"], 0);
    let dead = h.cms.document("lineage-edges", "edge-dead").unwrap();
    assert_eq!(dead["status"], "archived");
    let fresh = h.cms.document("lineage-edges", "edge-fresh").unwrap();
    assert_eq!(fresh["status"], "active");
    assert_eq!(fresh["activity24h"], 100);
}

#[tokio::test(start_paused = true)]
async fn daily_maintenance_writes_a_snapshot() {
    let h = harness();
    let now = Utc::now();
    h.cms.insert(
        "lineage-edges",
        serde_json::json!({
            "id": "edge-1",
            "producerApp": "a1", "topic": "orders", "consumerApp": "a2",
            "lastSeen": now,
            "activity24h": 3,
            "status": "active",
        }),
    );

    let record = h
        .engine
        .run_to_end::<ScheduledLineageMaintenanceWorkflow>(
            WorkflowId::derive("lineage-maintenance", "run-1"),
            MaintenanceWorkflowInput {
                reference_time: Some(now),
            },
        )
        .await
        .unwrap();
    assert_eq!(record.status, WorkflowStatus::Completed);

    let day = now.format("%Y-%m-%d").to_string();
    let expected_key = format!("lineage-snapshots/{day}.json");
    assert!(h.store.keys().contains(&expected_key));
    let snapshots = h.cms.all("lineage-snapshots");
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0]["edgeCount"], 1);
}

#[tokio::test(start_paused = true)]
async fn scheduled_triggers_run_the_registered_workflows() {
    use orbit_runtime::engine::Engine;

    let h = harness();
    for spec in orbit_orchestrator::static_schedules() {
        h.engine.create_schedule(spec).await.unwrap();
    }

    let outcome = h.engine.trigger_schedule("lineage-aggregation").await.unwrap();
    let record = h.engine.await_closed(&outcome.handle().workflow_id).await;
    assert_eq!(record.status, WorkflowStatus::Completed);
}
