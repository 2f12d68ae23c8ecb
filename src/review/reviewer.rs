//! Reviewer role (spec §4.3.2.d): one direct LLM call per iteration against
//! a reviewer prompt for the producer's output, parsed into a verdict plus
//! structured findings.

use std::sync::Arc;

use planloop_types::{Finding, ReviewKind, Verdict};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::errors::ReviewLoopError;
use crate::model::{extract_json, CompletionRequest, Message, ModelCaller};
use planloop_types::TraceContext;

pub struct ReviewOutcome {
    pub verdict: Verdict,
    pub summary: String,
    pub findings: Vec<Finding>,
    pub request_id: String,
}

#[derive(Debug, Deserialize)]
struct ReviewerOutput {
    verdict: VerdictWire,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    findings: Vec<Finding>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum VerdictWire {
    Approved,
    NeedsChanges,
    Escalated,
}

impl From<VerdictWire> for Verdict {
    fn from(w: VerdictWire) -> Self {
        match w {
            VerdictWire::Approved => Verdict::Approved,
            VerdictWire::NeedsChanges => Verdict::NeedsChanges,
            VerdictWire::Escalated => Verdict::Escalated,
        }
    }
}

pub struct Reviewer {
    model: Arc<ModelCaller>,
}

impl Reviewer {
    pub fn new(model: Arc<ModelCaller>) -> Self {
        Self { model }
    }

    pub async fn review(
        &self,
        trace: &TraceContext,
        slug: &str,
        kind: ReviewKind,
        iteration: u32,
        entity_summary: &str,
        cancel: &CancellationToken,
    ) -> Result<ReviewOutcome, ReviewLoopError> {
        let prompt = format!(
            "Review the {kind} output for plan '{slug}' (iteration {iteration}).\n\n{entity_summary}\n\nRespond as JSON: {{\"verdict\": \"approved|needs_changes|escalated\", \"summary\": ..., \"findings\": [{{\"severity\": \"blocking|major|minor|info\", \"sop_id\": ..., \"pointer\": ..., \"rationale\": ...}}]}}"
        );

        let request = CompletionRequest::new(
            "reviewing",
            vec![
                Message::system("You are a quality gate reviewer. Respond with JSON only."),
                Message::user(prompt),
            ],
        );

        let response = self.model.complete(trace, request, cancel).await?;
        let request_id = response.request_id.clone();

        let parsed: ReviewerOutput = extract_json(&response.content)
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| ReviewLoopError::UnparseableOutput {
                kind: kind.as_str().to_string(),
                slug: slug.to_string(),
                what: "reviewer did not return a {verdict, summary, findings[]} JSON object".to_string(),
            })?;

        Ok(ReviewOutcome {
            verdict: parsed.verdict.into(),
            summary: parsed.summary,
            findings: parsed.findings,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_wire_maps_approved() {
        let wire: VerdictWire = serde_json::from_value(serde_json::json!("approved")).unwrap();
        assert!(matches!(Verdict::from(wire), Verdict::Approved));
    }

    #[test]
    fn verdict_wire_maps_needs_changes() {
        let wire: VerdictWire = serde_json::from_value(serde_json::json!("needs_changes")).unwrap();
        assert!(matches!(Verdict::from(wire), Verdict::NeedsChanges));
    }

    #[test]
    fn reviewer_output_defaults_findings_to_empty() {
        let parsed: ReviewerOutput = serde_json::from_value(serde_json::json!({
            "verdict": "approved",
            "summary": "looks good",
        }))
        .unwrap();
        assert!(parsed.findings.is_empty());
    }
}
