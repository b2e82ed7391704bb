use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle of both workflow runs and step runs.
///
/// Transitions are monotone: `pending → running → terminal`. `skipped` is
/// reserved for steps whose guard condition suppressed them; it is terminal
/// and may be entered directly from `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled | RunStatus::Skipped
        )
    }

    /// Whether moving to `next` keeps the status monotone. Terminal statuses
    /// are immutable.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            RunStatus::Pending => matches!(
                next,
                RunStatus::Running | RunStatus::Cancelled | RunStatus::Skipped
            ),
            RunStatus::Running => next.is_terminal() && next != RunStatus::Skipped,
            _ => false,
        }
    }
}

/// Persisted record of one execution of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    /// Root input payload the trigger delivered
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(workflow_id: Uuid, input: Value, correlation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            error: None,
            input,
            output: Value::Null,
            correlation_id: correlation_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Persisted record of one execution attempt series of a step.
///
/// One step run exists per (run, step); `attempt` counts dispatches within
/// it. Output is keyed by port name. Terminal records are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    pub id: Uuid,
    pub workflow_run_id: Uuid,
    pub step_id: Uuid,
    pub status: RunStatus,
    #[serde(default)]
    pub input: Value,
    /// Port name → produced value
    #[serde(default)]
    pub output: HashMap<String, Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    pub attempt: u32,
    /// Non-fatal notes, e.g. unresolved template tokens
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl StepRun {
    pub fn new(workflow_run_id: Uuid, step_id: Uuid, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_run_id,
            step_id,
            status: RunStatus::Pending,
            input,
            output: HashMap::new(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error: None,
            error_kind: None,
            attempt: 0,
            warnings: Vec::new(),
        }
    }

    /// Stamp completion time and derive duration from `started_at`.
    pub fn finish(&mut self, status: RunStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_transitions_are_monotone() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Skipped));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Cancelled));

        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Cancelled.can_transition_to(RunStatus::Pending));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Skipped));
    }

    #[test]
    fn step_run_duration_matches_timestamps() {
        let mut run = StepRun::new(Uuid::new_v4(), Uuid::new_v4(), json!({}));
        run.started_at = Some(Utc::now() - chrono::Duration::milliseconds(250));
        run.finish(RunStatus::Completed);

        let completed = run.completed_at.unwrap();
        let started = run.started_at.unwrap();
        assert!(completed >= started);
        let duration = run.duration_ms.unwrap();
        assert!((250..1000).contains(&duration), "duration {duration}ms out of bounds");
    }
}
