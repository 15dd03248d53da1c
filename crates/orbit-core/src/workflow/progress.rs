use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the standard progress query every long-lived workflow answers.
pub const PROGRESS_QUERY: &str = "progress";

/// Snapshot returned by the progress query.
///
/// `percent` is `completed_steps / total_steps` with the total fixed per
/// execution path, so progress never moves backwards on replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub current_step: String,
    pub percent: f64,
    pub message: String,
    pub started_at: DateTime<Utc>,
}

impl Progress {
    pub fn at_step(
        current_step: impl Into<String>,
        completed: u32,
        total: u32,
        message: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            f64::from(completed.min(total)) / f64::from(total)
        };
        Self {
            current_step: current_step.into(),
            percent,
            message: message.into(),
            started_at,
        }
    }

    pub fn finished(step: impl Into<String>, message: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            current_step: step.into(),
            percent: 1.0,
            message: message.into(),
            started_at,
        }
    }
}
