//! The `Plan` entity and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::review::{IterationCalls, ReviewKind, Verdict};

/// `drafting → drafted → reviewed → approved → phases_generated →
/// phases_approved → tasks_generated → tasks_approved → implementing →
/// complete`, with `rejected` and `archived` as terminal branches reachable
/// from most states. The forward chain only ever advances one step at a
/// time; `rejected`/`archived` are the only branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Drafting,
    Drafted,
    Reviewed,
    Approved,
    PhasesGenerated,
    PhasesApproved,
    TasksGenerated,
    TasksApproved,
    Implementing,
    Complete,
    Rejected,
    Archived,
}

/// The forward chain, in order. `PlanStatus::next_in_chain` walks this.
const FORWARD_CHAIN: &[PlanStatus] = &[
    PlanStatus::Drafting,
    PlanStatus::Drafted,
    PlanStatus::Reviewed,
    PlanStatus::Approved,
    PlanStatus::PhasesGenerated,
    PlanStatus::PhasesApproved,
    PlanStatus::TasksGenerated,
    PlanStatus::TasksApproved,
    PlanStatus::Implementing,
    PlanStatus::Complete,
];

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Rejected | Self::Archived)
    }

    fn chain_index(&self) -> Option<usize> {
        FORWARD_CHAIN.iter().position(|s| s == self)
    }

    /// Authoritative transition check. Handlers must call this before
    /// mutating `status`; nothing else may.
    pub fn can_transition_to(&self, target: PlanStatus) -> bool {
        if *self == target {
            return false;
        }
        match target {
            PlanStatus::Archived => *self != PlanStatus::Archived,
            PlanStatus::Rejected => !self.is_terminal(),
            _ => match (self.chain_index(), target.chain_index()) {
                (Some(from), Some(to)) => to == from + 1,
                _ => false,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drafting => "drafting",
            Self::Drafted => "drafted",
            Self::Reviewed => "reviewed",
            Self::Approved => "approved",
            Self::PhasesGenerated => "phases_generated",
            Self::PhasesApproved => "phases_approved",
            Self::TasksGenerated => "tasks_generated",
            Self::TasksApproved => "tasks_approved",
            Self::Implementing => "implementing",
            Self::Complete => "complete",
            Self::Rejected => "rejected",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Include/exclude/protected scope sets, deduplicated preserving
/// first-seen order (a `Vec` with manual dedup rather than a `HashSet`, so
/// the simple-merge algorithm in the focus coordinator stays deterministic).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub protected: Vec<String>,
}

impl Scope {
    /// Union two scopes, deduplicating each set while preserving the
    /// first-seen order (the spec's "simple merge" requirement).
    pub fn merge(mut self, other: Scope) -> Self {
        Self::extend_dedup(&mut self.include, other.include);
        Self::extend_dedup(&mut self.exclude, other.exclude);
        Self::extend_dedup(&mut self.protected, other.protected);
        self
    }

    fn extend_dedup(base: &mut Vec<String>, extra: Vec<String>) {
        let mut seen: BTreeSet<String> = base.iter().cloned().collect();
        for item in extra {
            if seen.insert(item.clone()) {
                base.push(item);
            }
        }
    }
}

/// Per-kind (plan/phase/task) review state carried on the plan document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewFields {
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub findings: Vec<crate::review::Finding>,
    #[serde(default)]
    pub formatted_findings: Option<String>,
    #[serde(default)]
    pub iteration: u32,
}

/// LLM call history, grouped by which review kind consumed the calls and
/// which iteration produced them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmCallHistory {
    #[serde(default)]
    pub plan_review: Vec<IterationCalls>,
    #[serde(default)]
    pub phase_review: Vec<IterationCalls>,
    #[serde(default)]
    pub task_review: Vec<IterationCalls>,
}

impl LlmCallHistory {
    pub fn slot_mut(&mut self, kind: ReviewKind) -> &mut Vec<IterationCalls> {
        match kind {
            ReviewKind::Plan => &mut self.plan_review,
            ReviewKind::Phase => &mut self.phase_review,
            ReviewKind::Task => &mut self.task_review,
        }
    }

    pub fn slot(&self, kind: ReviewKind) -> &[IterationCalls] {
        match kind {
            ReviewKind::Plan => &self.plan_review,
            ReviewKind::Phase => &self.phase_review,
            ReviewKind::Task => &self.task_review,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub scope: Scope,
    pub status: PlanStatus,

    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phases_approved: bool,
    #[serde(default)]
    pub phases_approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tasks_approved: bool,
    #[serde(default)]
    pub tasks_approved_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub plan_review: ReviewFields,
    #[serde(default)]
    pub phase_review: ReviewFields,
    #[serde(default)]
    pub task_review: ReviewFields,

    #[serde(default)]
    pub llm_call_history: LlmCallHistory,

    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Derived UI label for a plan's current position. A pure function of
/// status + verdicts; never persisted separately (spec §3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStage {
    Drafting,
    InReview,
    Approved,
    GeneratingPhases,
    PhasesInReview,
    PhasesApproved,
    GeneratingTasks,
    TasksInReview,
    TasksApproved,
    Implementing,
    Complete,
    Rejected,
    Archived,
}

impl Plan {
    pub fn new(slug: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            slug: slug.into(),
            title: title.into(),
            goal: String::new(),
            context: String::new(),
            scope: Scope::default(),
            status: PlanStatus::Drafting,
            approved: false,
            approved_at: None,
            phases_approved: false,
            phases_approved_at: None,
            tasks_approved: false,
            tasks_approved_at: None,
            plan_review: ReviewFields::default(),
            phase_review: ReviewFields::default(),
            task_review: ReviewFields::default(),
            llm_call_history: LlmCallHistory::default(),
            last_error: None,
            last_error_at: None,
            created_at: now,
            updated_at: Some(now),
        }
    }

    /// Derive the UI-facing stage from status + per-kind review verdicts.
    /// Never persisted; recomputed on every read.
    pub fn stage(&self) -> PlanStage {
        match self.status {
            PlanStatus::Drafting => PlanStage::Drafting,
            PlanStatus::Drafted => {
                if self.plan_review.iteration > 0 {
                    PlanStage::InReview
                } else {
                    PlanStage::Drafting
                }
            }
            PlanStatus::Reviewed => PlanStage::InReview,
            PlanStatus::Approved => PlanStage::Approved,
            PlanStatus::PhasesGenerated => {
                if self.phase_review.iteration > 0 {
                    PlanStage::PhasesInReview
                } else {
                    PlanStage::GeneratingPhases
                }
            }
            PlanStatus::PhasesApproved => PlanStage::PhasesApproved,
            PlanStatus::TasksGenerated => {
                if self.task_review.iteration > 0 {
                    PlanStage::TasksInReview
                } else {
                    PlanStage::GeneratingTasks
                }
            }
            PlanStatus::TasksApproved => PlanStage::TasksApproved,
            PlanStatus::Implementing => PlanStage::Implementing,
            PlanStatus::Complete => PlanStage::Complete,
            PlanStatus::Rejected => PlanStage::Rejected,
            PlanStatus::Archived => PlanStage::Archived,
        }
    }

    /// Number of in-flight review loops (0, 1, or conceivably more if a
    /// caller retriggers a stage). Surfaced on `PlanWithStatus` and must
    /// never be serialized as absent — see JSON contract invariants.
    pub fn active_loops(&self) -> Vec<ReviewKind> {
        let mut loops = Vec::new();
        let in_progress = |fields: &ReviewFields| {
            fields.iteration > 0 && !matches!(fields.verdict, Some(Verdict::Approved))
        };
        if in_progress(&self.plan_review) {
            loops.push(ReviewKind::Plan);
        }
        if in_progress(&self.phase_review) {
            loops.push(ReviewKind::Phase);
        }
        if in_progress(&self.task_review) {
            loops.push(ReviewKind::Task);
        }
        loops
    }

    /// The "new gate" per the spec's resolved open question: execute
    /// requires both plan approval and tasks approval whenever a status has
    /// been set at all.
    pub fn can_execute(&self) -> bool {
        !matches!(self.status, PlanStatus::Drafting) && self.approved && self.tasks_approved
    }

    /// The `ReviewFields` slot a given loop kind reads and writes.
    pub fn review_fields(&self, kind: ReviewKind) -> &ReviewFields {
        match kind {
            ReviewKind::Plan => &self.plan_review,
            ReviewKind::Phase => &self.phase_review,
            ReviewKind::Task => &self.task_review,
        }
    }

    pub fn review_fields_mut(&mut self, kind: ReviewKind) -> &mut ReviewFields {
        match kind {
            ReviewKind::Plan => &mut self.plan_review,
            ReviewKind::Phase => &mut self.phase_review,
            ReviewKind::Task => &mut self.task_review,
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.last_error_at = Some(Utc::now());
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_chain_allows_single_step() {
        assert!(PlanStatus::Drafting.can_transition_to(PlanStatus::Drafted));
        assert!(!PlanStatus::Drafting.can_transition_to(PlanStatus::Reviewed));
    }

    #[test]
    fn rejected_reachable_from_non_terminal_states() {
        assert!(PlanStatus::Approved.can_transition_to(PlanStatus::Rejected));
        assert!(PlanStatus::Drafting.can_transition_to(PlanStatus::Rejected));
        assert!(!PlanStatus::Complete.can_transition_to(PlanStatus::Rejected));
        assert!(!PlanStatus::Rejected.can_transition_to(PlanStatus::Rejected));
    }

    #[test]
    fn archived_reachable_from_any_non_archived_state() {
        assert!(PlanStatus::Complete.can_transition_to(PlanStatus::Archived));
        assert!(PlanStatus::Rejected.can_transition_to(PlanStatus::Archived));
        assert!(!PlanStatus::Archived.can_transition_to(PlanStatus::Archived));
    }

    #[test]
    fn identity_transition_is_never_legal() {
        assert!(!PlanStatus::Approved.can_transition_to(PlanStatus::Approved));
    }

    #[test]
    fn scope_merge_dedupes_preserving_first_seen_order() {
        let a = Scope {
            include: vec!["api".into(), "data".into()],
            ..Default::default()
        };
        let b = Scope {
            include: vec!["data".into(), "auth".into()],
            ..Default::default()
        };
        let merged = a.merge(b);
        assert_eq!(merged.include, vec!["api", "data", "auth"]);
    }

    #[test]
    fn can_execute_requires_plan_and_tasks_approved() {
        let mut plan = Plan::new("add-caching", "Add caching");
        plan.status = PlanStatus::TasksApproved;
        assert!(!plan.can_execute());
        plan.approved = true;
        assert!(!plan.can_execute());
        plan.tasks_approved = true;
        assert!(plan.can_execute());
    }

    #[test]
    fn active_loops_empty_when_no_review_started() {
        let plan = Plan::new("add-caching", "Add caching");
        assert!(plan.active_loops().is_empty());
    }

    #[test]
    fn review_fields_mut_targets_the_right_slot() {
        let mut plan = Plan::new("add-caching", "Add caching");
        plan.review_fields_mut(ReviewKind::Phase).iteration = 2;
        assert_eq!(plan.review_fields(ReviewKind::Phase).iteration, 2);
        assert_eq!(plan.review_fields(ReviewKind::Plan).iteration, 0);
    }
}
