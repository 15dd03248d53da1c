use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::error::{OrbitError, Result};
use crate::workflow::WorkflowId;

/// A registered schedule: the engine starts `family` with `input` under
/// `workflow_id` whenever the cron expression fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub id: String,
    pub family: String,
    pub workflow_id: WorkflowId,
    pub input: serde_json::Value,
    /// Seven-field cron expression (seconds included).
    pub cron: String,
    pub timezone: String,
}

impl ScheduleSpec {
    pub fn new(
        id: impl Into<String>,
        family: impl Into<String>,
        workflow_id: WorkflowId,
        input: serde_json::Value,
        cron: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            family: family.into(),
            workflow_id,
            input,
            cron: cron.into(),
            timezone: "UTC".to_string(),
        }
    }

    pub fn in_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Validate the cron expression and timezone.
    pub fn validate(&self) -> Result<()> {
        self.parsed()?;
        Ok(())
    }

    /// Next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let (schedule, tz) = self.parsed()?;
        let next = schedule
            .after(&after.with_timezone(&tz))
            .next()
            .map(|t| t.with_timezone(&Utc));
        Ok(next)
    }

    fn parsed(&self) -> Result<(Schedule, Tz)> {
        let schedule = Schedule::from_str(&self.cron).map_err(|e| {
            OrbitError::validation(format!("schedule {}: bad cron {:?}: {e}", self.id, self.cron))
        })?;
        let tz: Tz = self.timezone.parse().map_err(|_| {
            OrbitError::validation(format!(
                "schedule {}: unknown timezone {:?}",
                self.id, self.timezone
            ))
        })?;
        Ok((schedule, tz))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn spec(cron: &str) -> ScheduleSpec {
        ScheduleSpec::new(
            "lineage-aggregation",
            "lineage-aggregation",
            WorkflowId::derive("lineage-aggregation", "scheduled"),
            serde_json::json!({}),
            cron,
        )
    }

    #[test]
    fn five_minute_cadence() {
        let spec = spec("0 */5 * * * * *");
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 12, 2, 0).unwrap();
        let next = spec.next_after(after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap());
    }

    #[test]
    fn daily_cadence() {
        let spec = spec("0 0 3 * * * *");
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let next = spec.next_after(after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap());
    }

    #[test]
    fn bad_cron_is_validation() {
        let err = spec("every five minutes").validate().unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Validation);
    }

    #[test]
    fn bad_timezone_is_validation() {
        let err = spec("0 */5 * * * * *")
            .in_timezone("Mars/Olympus")
            .validate()
            .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Validation);
    }
}
