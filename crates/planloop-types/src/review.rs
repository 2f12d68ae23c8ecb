//! Review findings, verdicts, and per-iteration call bookkeeping shared by
//! the review loop engine, the plan manager, and the HTTP surface.

use serde::{Deserialize, Serialize};

/// Which of the three review loops a given record belongs to. Also used as
/// the "kind descriptor" tag the loop engine is parameterized by (spec
/// §9 "Polymorphism over review kind" — a tagged variant over inheritance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    Plan,
    Phase,
    Task,
}

impl ReviewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Phase => "phase",
            Self::Task => "task",
        }
    }

    pub fn loop_name(&self) -> &'static str {
        match self {
            Self::Plan => "plan-review-loop",
            Self::Phase => "phase-review-loop",
            Self::Task => "task-review-loop",
        }
    }
}

impl std::fmt::Display for ReviewKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `approved | needs_changes | escalated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    NeedsChanges,
    Escalated,
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Severity of one reviewer observation. Ordered most to least severe so a
/// derive(Ord) sort puts the worst finding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Blocking,
    Major,
    Minor,
    Info,
}

/// One reviewer observation: `{severity, sop_id, pointer, rationale}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: FindingSeverity,
    /// Standard-of-practice id a finding references, e.g. `"SOP-042"`.
    pub sop_id: String,
    /// Where the finding applies — a task id, a section heading, a path.
    pub pointer: String,
    pub rationale: String,
}

impl Finding {
    pub fn new(
        severity: FindingSeverity,
        sop_id: impl Into<String>,
        pointer: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            sop_id: sop_id.into(),
            pointer: pointer.into(),
            rationale: rationale.into(),
        }
    }

    /// Render findings as the human-readable report stored alongside the
    /// raw list (`formatted_findings` on the plan and in escalation
    /// payloads).
    pub fn format_all(findings: &[Finding]) -> String {
        if findings.is_empty() {
            return "No findings.".to_string();
        }
        findings
            .iter()
            .map(|f| {
                format!(
                    "- [{:?}] {} ({}): {}",
                    f.severity, f.pointer, f.sop_id, f.rationale
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One append-only entry: `{iteration, llm_request_ids[], verdict}`, filed
/// under the review kind's history slot on the plan (§4.3.2.e).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationCalls {
    pub iteration: u32,
    pub llm_request_ids: Vec<String>,
    pub verdict: Verdict,
}

/// `{plan slug, kind, n}` — append-only; each iteration adds one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIteration {
    pub slug: String,
    pub kind: ReviewKind,
    pub n: u32,
    pub verdict: Verdict,
    pub findings: Vec<Finding>,
    pub llm_request_ids: Vec<String>,
    pub formatted_report: String,
}

impl ReviewIteration {
    pub fn new(
        slug: impl Into<String>,
        kind: ReviewKind,
        n: u32,
        verdict: Verdict,
        findings: Vec<Finding>,
        llm_request_ids: Vec<String>,
    ) -> Self {
        let formatted_report = Finding::format_all(&findings);
        Self {
            slug: slug.into(),
            kind,
            n,
            verdict,
            findings,
            llm_request_ids,
            formatted_report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_all_empty_is_no_findings() {
        assert_eq!(Finding::format_all(&[]), "No findings.");
    }

    #[test]
    fn format_all_includes_pointer_and_sop() {
        let findings = vec![Finding::new(
            FindingSeverity::Major,
            "SOP-7",
            "task-3",
            "missing acceptance criteria",
        )];
        let rendered = Finding::format_all(&findings);
        assert!(rendered.contains("task-3"));
        assert!(rendered.contains("SOP-7"));
    }

    #[test]
    fn review_kind_loop_names() {
        assert_eq!(ReviewKind::Plan.loop_name(), "plan-review-loop");
        assert_eq!(ReviewKind::Phase.loop_name(), "phase-review-loop");
        assert_eq!(ReviewKind::Task.loop_name(), "task-review-loop");
    }

    #[test]
    fn severity_ordering_blocking_is_worst() {
        assert!(FindingSeverity::Blocking < FindingSeverity::Minor);
    }
}
