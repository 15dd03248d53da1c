//! Workflow families and the registration table the worker walks at
//! startup.

pub mod access;
pub mod build;
pub mod credential;
pub mod decommission;
pub mod deployment;
pub mod health;
pub mod lineage;
pub mod template;
pub mod token_refresh;
pub mod topic;
pub mod virtual_cluster;

use orbit_core::workflow::WorkflowId;
use orbit_core::ScheduleSpec;
use orbit_runtime::WorkflowRegistry;

pub use access::{AccessProvisioningWorkflow, AccessRevocationWorkflow};
pub use build::BuildWorkflow;
pub use credential::{CredentialRevokeWorkflow, CredentialUpsertWorkflow};
pub use decommission::{ApplicationCleanupWorkflow, ApplicationDecommissioningWorkflow};
pub use deployment::DeploymentWorkflow;
pub use health::HealthCheckWorkflow;
pub use lineage::{
    ActivityProcessingWorkflow, LineageAggregationWorkflow, ScheduledLineageMaintenanceWorkflow,
};
pub use template::TemplateInstantiationWorkflow;
pub use token_refresh::GitHubTokenRefreshWorkflow;
pub use topic::{
    TopicConfigSyncWorkflow, TopicCreatedSyncWorkflow, TopicDeletedSyncWorkflow,
    TopicDeletionWorkflow, TopicProvisioningWorkflow,
};
pub use virtual_cluster::{
    SingleVirtualClusterProvisionWorkflow, VirtualClusterProvisionWorkflow,
};

/// Every workflow family this worker serves.
pub fn table() -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::new();
    registry.register::<GitHubTokenRefreshWorkflow>();
    registry.register::<TemplateInstantiationWorkflow>();
    registry.register::<BuildWorkflow>();
    registry.register::<DeploymentWorkflow>();
    registry.register::<HealthCheckWorkflow>();
    registry.register::<VirtualClusterProvisionWorkflow>();
    registry.register::<SingleVirtualClusterProvisionWorkflow>();
    registry.register::<CredentialUpsertWorkflow>();
    registry.register::<CredentialRevokeWorkflow>();
    registry.register::<TopicProvisioningWorkflow>();
    registry.register::<TopicDeletionWorkflow>();
    registry.register::<TopicCreatedSyncWorkflow>();
    registry.register::<TopicDeletedSyncWorkflow>();
    registry.register::<TopicConfigSyncWorkflow>();
    registry.register::<AccessProvisioningWorkflow>();
    registry.register::<AccessRevocationWorkflow>();
    registry.register::<ActivityProcessingWorkflow>();
    registry.register::<LineageAggregationWorkflow>();
    registry.register::<ScheduledLineageMaintenanceWorkflow>();
    registry.register::<ApplicationDecommissioningWorkflow>();
    registry.register::<ApplicationCleanupWorkflow>();
    registry
}

/// The static schedules registered with the engine at startup. Per-app
/// health-check schedules are created by the command plane.
pub fn static_schedules() -> Vec<ScheduleSpec> {
    vec![
        ScheduleSpec::new(
            "lineage-aggregation",
            lineage::AGGREGATION_FAMILY,
            WorkflowId::derive(lineage::AGGREGATION_FAMILY, "scheduled"),
            serde_json::json!({}),
            // Every five minutes.
            "0 */5 * * * * *",
        ),
        ScheduleSpec::new(
            "lineage-maintenance",
            lineage::MAINTENANCE_FAMILY,
            WorkflowId::derive(lineage::MAINTENANCE_FAMILY, "scheduled"),
            serde_json::json!({}),
            // Daily at 03:10 UTC.
            "0 10 3 * * * *",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_registers_every_family() {
        let registry = table();
        let families = registry.families();
        for family in [
            "token-refresh",
            "template-instantiation",
            "build",
            "deployment",
            "health-check",
            "virtual-cluster-provision",
            "virtual-cluster-provision-env",
            "credential-upsert",
            "credential-revoke",
            "topic-provisioning",
            "topic-deletion",
            "topic-created-sync",
            "topic-deleted-sync",
            "topic-config-sync",
            "access-provisioning",
            "access-revocation",
            "activity-processing",
            "lineage-aggregation",
            "lineage-maintenance",
            "app-decommission",
            "app-cleanup",
        ] {
            assert!(families.contains(&family), "missing family {family}");
        }
        assert_eq!(registry.len(), 21);
    }

    #[test]
    fn static_schedules_validate() {
        let schedules = static_schedules();
        assert_eq!(schedules.len(), 2);
        for spec in schedules {
            spec.validate().unwrap();
        }
    }
}
