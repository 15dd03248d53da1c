use orbit_core::{Result, ScheduleSpec};

use crate::engine::Engine;

/// The static schedule table the worker registers with the engine at
/// startup. Registration is idempotent on the engine side (schedule ids
/// are stable).
#[derive(Default)]
pub struct ScheduleRegistry {
    specs: Vec<ScheduleSpec>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, spec: ScheduleSpec) {
        self.specs.push(spec);
    }

    pub fn specs(&self) -> &[ScheduleSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Validate every spec locally, then register them with the engine.
    pub async fn register_all(&self, engine: &dyn Engine) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            spec.validate()?;
            let id = engine.create_schedule(spec.clone()).await?;
            tracing::info!(schedule = %spec.id, cron = %spec.cron, "schedule registered");
            ids.push(id);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use orbit_core::workflow::WorkflowId;

    use super::*;

    #[test]
    fn collects_specs() {
        let mut registry = ScheduleRegistry::new();
        assert!(registry.is_empty());
        registry.add(ScheduleSpec::new(
            "lineage-aggregation",
            "lineage-aggregation",
            WorkflowId::derive("lineage-aggregation", "scheduled"),
            serde_json::json!({}),
            "0 */5 * * * * *",
        ));
        assert_eq!(registry.len(), 1);
        assert!(registry.specs()[0].validate().is_ok());
    }
}
