//! The `Phase` entity: one step of a plan's execution, generated by the
//! phase-generator and gated behind its own review loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseApproval {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// Identity is `{slug, sequence}` — a phase belongs to exactly one plan
/// (same slug) and has a position among its siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub plan_slug: String,
    pub id: String,
    pub sequence: u32,
    pub name: String,
    pub description: String,
    /// Ids of phases (within the same plan) this phase depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub approval: PhaseApproval,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    /// Opaque per-phase agent configuration the execution surface forwards
    /// to whatever runs the phase; the orchestrator never interprets it.
    #[serde(default)]
    pub agent_config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Phase {
    pub fn new(
        plan_slug: impl Into<String>,
        id: impl Into<String>,
        sequence: u32,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            plan_slug: plan_slug.into(),
            id: id.into(),
            sequence,
            name: name.into(),
            description: description.into(),
            dependencies: Vec::new(),
            approval: PhaseApproval::Pending,
            approved_at: None,
            agent_config: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn approve(&mut self) {
        self.approval = PhaseApproval::Approved;
        self.approved_at = Some(Utc::now());
    }

    pub fn reject(&mut self) {
        self.approval = PhaseApproval::Rejected;
        self.approved_at = None;
    }

    pub fn is_approved(&self) -> bool {
        matches!(self.approval, PhaseApproval::Approved)
    }

    /// Whether every id in `dependencies` is satisfied by the given set of
    /// already-approved phase ids.
    pub fn dependencies_satisfied(&self, approved_ids: &std::collections::HashSet<String>) -> bool {
        self.dependencies.iter().all(|d| approved_ids.contains(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn new_phase_starts_pending() {
        let phase = Phase::new("add-caching", "p1", 1, "API layer", "wire the cache client");
        assert_eq!(phase.approval, PhaseApproval::Pending);
        assert!(!phase.is_approved());
    }

    #[test]
    fn approve_sets_timestamp() {
        let mut phase = Phase::new("add-caching", "p1", 1, "API layer", "desc");
        phase.approve();
        assert!(phase.is_approved());
        assert!(phase.approved_at.is_some());
    }

    #[test]
    fn dependencies_satisfied_requires_all() {
        let mut phase = Phase::new("add-caching", "p2", 2, "Data layer", "desc");
        phase.dependencies = vec!["p1".into()];
        let mut approved = HashSet::new();
        assert!(!phase.dependencies_satisfied(&approved));
        approved.insert("p1".to_string());
        assert!(phase.dependencies_satisfied(&approved));
    }
}
