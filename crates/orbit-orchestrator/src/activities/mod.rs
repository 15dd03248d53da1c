//! Side-effecting activity groups. Each group registers its handlers with
//! the worker's activity table, capturing the shared dependencies.

pub mod access;
pub mod build;
pub mod credential;
pub mod decommission;
pub mod deployment;
pub mod git;
pub mod health;
pub mod lineage;
pub mod template;
pub mod token;
pub mod topic;
pub mod virtual_cluster;

use std::sync::Arc;

use orbit_core::activity::ActivityRegistry;

use crate::deps::WorkerDeps;

/// Register every activity group. The worker walks the result at startup.
pub fn register_all(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    token::register(reg, deps);
    git::register(reg, deps);
    template::register(reg, deps);
    build::register(reg, deps);
    deployment::register(reg, deps);
    health::register(reg, deps);
    virtual_cluster::register(reg, deps);
    credential::register(reg, deps);
    topic::register(reg, deps);
    access::register(reg, deps);
    lineage::register(reg, deps);
    decommission::register(reg, deps);
}
