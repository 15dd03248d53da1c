//! Health-check workflow: probe then record.

mod common;

use orbit_core::workflow::{WorkflowId, WorkflowStatus};
use orbit_orchestrator::activities::health::HealthReport;
use orbit_orchestrator::workflows::health::HealthCheckInput;
use orbit_orchestrator::workflows::HealthCheckWorkflow;
use orbit_runtime::testing::decode_output;

use common::harness;

#[tokio::test(start_paused = true)]
async fn app_without_endpoints_reports_healthy() {
    let h = harness();
    h.seed_app("a1", "ws1");

    let record = h
        .engine
        .run_to_end::<HealthCheckWorkflow>(
            WorkflowId::derive("health-check", "a1"),
            HealthCheckInput {
                app_id: "a1".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Completed);
    let report: HealthReport = decode_output(&record).unwrap();
    assert!(report.healthy);
    assert!(report.checks.is_empty());

    let recorded = h.cms.health_checks();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0]["app_id"], "a1");
}

#[tokio::test(start_paused = true)]
async fn missing_app_fails_not_found() {
    let h = harness();

    let record = h
        .engine
        .run_to_end::<HealthCheckWorkflow>(
            WorkflowId::derive("health-check", "ghost"),
            HealthCheckInput {
                app_id: "ghost".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::Failed);
    assert_eq!(record.error.unwrap().kind, "NOT_FOUND");
}
