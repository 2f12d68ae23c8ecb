//! The `Task` entity: the smallest unit of execution under a phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Implement,
    Test,
    Document,
    Review,
    Refactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    PendingApproval,
    Approved,
    Rejected,
    Executing,
    Complete,
    Failed,
}

/// One given/when/then acceptance triple. Required on every task — never
/// omitted, per the spec's data model invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub given: String,
    pub when: String,
    pub then: String,
}

impl AcceptanceCriterion {
    pub fn new(given: impl Into<String>, when: impl Into<String>, then: impl Into<String>) -> Self {
        Self {
            given: given.into(),
            when: when.into(),
            then: then.into(),
        }
    }
}

/// Identity is `{slug, sequence}`, scoped to the owning plan and phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub plan_slug: String,
    pub id: String,
    pub sequence: u32,
    pub phase_id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Never serialized as absent: `#[serde(default)]` covers deserializing
    /// an old document with no criteria, but a freshly-built task always
    /// gets at least an empty `Vec`, which serializes as `[]`, not absence.
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub escalated: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        plan_slug: impl Into<String>,
        id: impl Into<String>,
        sequence: u32,
        phase_id: impl Into<String>,
        description: impl Into<String>,
        task_type: TaskType,
    ) -> Self {
        Self {
            plan_slug: plan_slug.into(),
            id: id.into(),
            sequence,
            phase_id: phase_id.into(),
            description: description.into(),
            task_type,
            status: TaskStatus::PendingApproval,
            acceptance_criteria: Vec::new(),
            depends_on: Vec::new(),
            escalated: false,
            last_error: None,
            last_error_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn approve(&mut self) -> Result<(), &'static str> {
        if self.status != TaskStatus::PendingApproval {
            return Err("task is not pending approval");
        }
        self.status = TaskStatus::Approved;
        Ok(())
    }

    pub fn reject(&mut self) -> Result<(), &'static str> {
        if self.status != TaskStatus::PendingApproval {
            return Err("task is not pending approval");
        }
        self.status = TaskStatus::Rejected;
        Ok(())
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.last_error_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_has_empty_acceptance_criteria_not_absent() {
        let task = Task::new("add-caching", "t1", 1, "p1", "wire cache client", TaskType::Implement);
        assert!(task.acceptance_criteria.is_empty());
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("acceptance_criteria").is_some());
        assert_eq!(json["acceptance_criteria"], serde_json::json!([]));
    }

    #[test]
    fn approve_requires_pending_approval() {
        let mut task = Task::new("add-caching", "t1", 1, "p1", "desc", TaskType::Test);
        assert!(task.approve().is_ok());
        assert_eq!(task.status, TaskStatus::Approved);
        assert!(task.approve().is_err());
    }

    #[test]
    fn reject_requires_pending_approval() {
        let mut task = Task::new("add-caching", "t1", 1, "p1", "desc", TaskType::Test);
        task.status = TaskStatus::Executing;
        assert!(task.reject().is_err());
    }
}
