//! The orbit orchestration domain: services, activities, and workflow
//! families, plus the registration tables the worker walks at startup.
//!
//! Layering: workflows compose activities through the
//! `orbit-core` context; activities call adapters from `orbit-clients`;
//! services hold the domain logic shared by activities.

pub mod activities;
pub mod deps;
pub mod records;
pub mod services;
pub mod workflows;

pub use deps::{WorkDirKind, WorkerDeps};
pub use workflows::{static_schedules, table};
