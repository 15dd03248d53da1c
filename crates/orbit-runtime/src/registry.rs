use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use orbit_core::workflow::{OrbitWorkflow, WorkflowContext, WorkflowInfo};
use orbit_core::{OrbitError, Result};

type BoxedWorkflowFuture<'a> = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send + 'a>>;

/// Type-erased workflow handler: JSON input, JSON output.
pub type BoxedWorkflowHandler = Arc<
    dyn for<'a> Fn(&'a WorkflowContext, serde_json::Value) -> BoxedWorkflowFuture<'a>
        + Send
        + Sync,
>;

/// A registered workflow family.
pub struct WorkflowEntry {
    pub info: WorkflowInfo,
    pub handler: BoxedWorkflowHandler,
}

impl WorkflowEntry {
    pub fn new<W: OrbitWorkflow>() -> Self {
        Self {
            info: W::info(),
            handler: Arc::new(|ctx, input| {
                Box::pin(async move {
                    let typed: W::Input = serde_json::from_value(input).map_err(|e| {
                        OrbitError::validation(format!(
                            "invalid input for {}: {e}",
                            W::info().family
                        ))
                    })?;
                    let output = W::execute(ctx, typed).await?;
                    serde_json::to_value(output).map_err(OrbitError::from)
                })
            }),
        }
    }
}

/// Table of workflow families the worker walks at startup.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<&'static str, WorkflowEntry>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<W: OrbitWorkflow>(&mut self) {
        let entry = WorkflowEntry::new::<W>();
        self.workflows.insert(entry.info.family, entry);
    }

    pub fn get(&self, family: &str) -> Option<&WorkflowEntry> {
        self.workflows.get(family)
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    pub fn families(&self) -> Vec<&'static str> {
        let mut families: Vec<_> = self.workflows.keys().copied().collect();
        families.sort_unstable();
        families
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    struct Noop;

    #[derive(Serialize, Deserialize)]
    struct NoopInput;

    impl OrbitWorkflow for Noop {
        type Input = NoopInput;
        type Output = u32;

        fn info() -> WorkflowInfo {
            WorkflowInfo {
                family: "noop",
                ..WorkflowInfo::default()
            }
        }

        fn execute(
            _ctx: &WorkflowContext,
            _input: Self::Input,
        ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
            Box::pin(async { Ok(7) })
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = WorkflowRegistry::new();
        assert!(registry.is_empty());
        registry.register::<Noop>();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("noop").is_some());
        assert!(registry.get("absent").is_none());
        assert_eq!(registry.families(), vec!["noop"]);
    }
}
