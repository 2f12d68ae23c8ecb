//! The review loop engine (spec §4.3): one engine instance drives all three
//! loops, parameterized at the call site by [`ReviewKind`]. Consumer-loop
//! wiring (fetch, dispatch, ack/nak/term) lives in [`super::consumer`],
//! which calls [`ReviewLoopEngine::run_trigger`] for each message; this
//! module is just the control flow inside one trigger handling (§4.3.2).

use std::sync::Arc;

use planloop_types::{Finding, IterationCalls, MessageEnvelope, MessageType, Plan, ReviewFields, ReviewKind, Verdict};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use super::producer::{Producer, ProducerEntity};
use super::reviewer::Reviewer;
use super::state::LoopStateStore;
use super::subjects;
use crate::errors::ReviewLoopError;
use crate::plan::PlanManager;
use crate::questions::QuestionStore;
use crate::substrate::Substrate;
use planloop_types::TraceContext;

/// Default iteration budget per spec §4.3 ("bounded iteration budget
/// (default 3)").
pub const DEFAULT_BUDGET: u32 = 3;

pub struct ReviewLoopEngine {
    substrate: Arc<Substrate>,
    plan_manager: Arc<PlanManager>,
    state_store: LoopStateStore,
    reviewer: Reviewer,
    plan_producer: Arc<dyn Producer>,
    phase_producer: Arc<dyn Producer>,
    task_producer: Arc<dyn Producer>,
    question_store: Arc<QuestionStore>,
    budget: u32,
}

impl ReviewLoopEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        substrate: Arc<Substrate>,
        plan_manager: Arc<PlanManager>,
        state_store: LoopStateStore,
        reviewer: Reviewer,
        plan_producer: Arc<dyn Producer>,
        phase_producer: Arc<dyn Producer>,
        task_producer: Arc<dyn Producer>,
        question_store: Arc<QuestionStore>,
    ) -> Self {
        Self {
            substrate,
            plan_manager,
            state_store,
            reviewer,
            plan_producer,
            phase_producer,
            task_producer,
            question_store,
            budget: DEFAULT_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: u32) -> Self {
        self.budget = budget;
        self
    }

    fn producer_for(&self, kind: ReviewKind) -> &Arc<dyn Producer> {
        match kind {
            ReviewKind::Plan => &self.plan_producer,
            ReviewKind::Phase => &self.phase_producer,
            ReviewKind::Task => &self.task_producer,
        }
    }

    /// Wrap `payload` in a [`MessageEnvelope`] carrying the trigger's trace
    /// id, so every downstream consumer's `parse_envelope` recovers the
    /// originating trace instead of minting a fresh, unrelated one (spec §8:
    /// "the result's trace_id equals the trigger's trace_id").
    fn envelope_json(&self, trace: &TraceContext, category: &str, payload: serde_json::Value) -> serde_json::Value {
        let mut envelope = MessageEnvelope::new(
            MessageType::new("workflow", category, "v1"),
            payload,
            "review-loop-engine",
            trace.trace_id.clone(),
        );
        if let Some(loop_id) = trace.loop_id.clone() {
            envelope = envelope.with_loop_id(loop_id);
        }
        serde_json::to_value(envelope).expect("MessageEnvelope always serializes")
    }

    /// Run one full trigger (spec §4.3.2): loads or creates loop state, then
    /// drives the generate/review/revise loop until approval or budget
    /// exhaustion, publishing events as it goes.
    #[instrument(skip(self, trace, cancel), fields(slug = %slug, kind = %kind))]
    pub async fn run_trigger(
        &self,
        kind: ReviewKind,
        trace: &TraceContext,
        slug: &str,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ReviewLoopError> {
        if self.question_store.has_pending_blocking_for_slug(slug).await.map_err(|e| ReviewLoopError::StateIo {
            kind: kind.as_str().to_string(),
            slug: slug.to_string(),
            source: anyhow::Error::from(e),
        })? {
            info!("{kind} loop staying paused on an unanswered blocking question");
            return Ok(());
        }

        let mut state = self.state_store.load_or_create(slug, kind).await?;

        while state.iteration < self.budget && !state.is_approved() {
            state.iteration += 1;
            self.state_store.save(&state).await?;

            let previous_findings = if state.iteration > 1 {
                let plan = self.plan_manager.load_plan(slug).await?;
                plan.review_fields(kind).formatted_findings.clone()
            } else {
                None
            };

            let produced = self
                .producer_for(kind)
                .produce(trace, slug, description, previous_findings.as_deref(), cancel)
                .await?;

            let blocking_gaps: Vec<_> = produced.gaps.iter().filter(|g| g.urgency == planloop_types::Urgency::Blocking).collect();
            if !blocking_gaps.is_empty() {
                self.file_blocking_questions(trace, kind, slug, &blocking_gaps).await?;
                info!(iteration = state.iteration, "{kind} loop pausing on {} blocking gap(s)", blocking_gaps.len());
                return Ok(());
            }

            let Some(entity) = produced.entity else {
                return Err(ReviewLoopError::UnparseableOutput {
                    kind: kind.as_str().to_string(),
                    slug: slug.to_string(),
                    what: "producer returned no entity and no blocking gap".to_string(),
                });
            };

            self.persist_entity(slug, kind, &entity).await?;
            self.publish_entity_best_effort(trace, kind, slug, &entity).await;

            let summary = summarize_entity(&entity);
            let outcome = self
                .reviewer
                .review(trace, slug, kind, state.iteration, &summary, cancel)
                .await?;

            let mut request_ids = produced.request_ids;
            request_ids.push(outcome.request_id.clone());

            self.record_iteration(slug, kind, state.iteration, &outcome.verdict, &outcome.summary, &outcome.findings, &request_ids)
                .await?;

            state.verdict = Some(outcome.verdict);
            self.state_store.save(&state).await?;

            if outcome.verdict.is_approved() {
                info!(iteration = state.iteration, "{kind} loop approved");
                let payload = json!({
                    "slug": slug,
                    "iteration": state.iteration,
                    "summary": outcome.summary,
                    "verdict": outcome.verdict,
                });
                let envelope = self.envelope_json(trace, "approved", payload.clone());
                self.substrate.publish_json(subjects::approved_subject(kind), &envelope).await?;
                // Also land on the `workflow.result.<kind>.<slug>` subject so an
                // in-flight synchronous promote wait (§4.3.3) can pick this up.
                self.substrate
                    .publish_best_effort(subjects::result_subject(kind.as_str(), slug), &envelope)
                    .await;
                return Ok(());
            }

            let payload = json!({
                "slug": slug,
                "iteration": state.iteration,
                "findings": outcome.findings,
                "llm_request_ids": request_ids,
                "verdict": outcome.verdict,
            });
            let envelope = self.envelope_json(trace, "revision_needed", payload);
            self.substrate.publish_json(subjects::revision_needed_subject(kind), &envelope).await?;
            self.substrate
                .publish_best_effort(subjects::result_subject(kind.as_str(), slug), &envelope)
                .await;
        }

        if state.is_approved() {
            return Ok(());
        }
        self.escalate(trace, kind, slug, state.iteration).await
    }

    /// File a [`Question`](planloop_types::Question) for each blocking gap so
    /// the loop stays paused until an answer arrives (spec §8 scenario 4).
    async fn file_blocking_questions(
        &self,
        trace: &TraceContext,
        kind: ReviewKind,
        slug: &str,
        gaps: &[&planloop_types::Gap],
    ) -> Result<(), ReviewLoopError> {
        let topic = format!("{kind}.gap.scope");
        for gap in gaps {
            self.question_store
                .create(Uuid::new_v4().to_string(), trace.trace_id.clone(), Some(slug.to_string()), topic.clone(), gap)
                .await
                .map_err(|e| ReviewLoopError::StateIo {
                    kind: kind.as_str().to_string(),
                    slug: slug.to_string(),
                    source: anyhow::Error::from(e),
                })?;
        }
        Ok(())
    }

    async fn persist_entity(&self, slug: &str, kind: ReviewKind, entity: &ProducerEntity) -> Result<(), ReviewLoopError> {
        match entity {
            ProducerEntity::Plan { goal, context, scope } => {
                let mut plan = self.plan_manager.load_plan(slug).await?;
                plan.goal = goal.clone();
                plan.context = context.clone();
                plan.scope = scope.clone();
                plan.touch();
                self.plan_manager.save_plan(&plan).await?;
            }
            ProducerEntity::Phases(phases) => {
                self.plan_manager.save_phases(slug, phases).await?;
            }
            ProducerEntity::Tasks(tasks) => {
                self.plan_manager.save_tasks(slug, tasks).await?;
            }
        }
        let _ = kind;
        Ok(())
    }

    /// Publish the produced entity to the graph ingester's inbound subject.
    /// Best-effort: a dropped graph update never fails the review loop.
    async fn publish_entity_best_effort(&self, trace: &TraceContext, kind: ReviewKind, slug: &str, entity: &ProducerEntity) {
        let subject = subjects::result_subject(&format!("{kind}-producer"), slug);
        let payload = match entity {
            ProducerEntity::Plan { goal, context, scope } => json!({"slug": slug, "goal": goal, "context": context, "scope": scope}),
            ProducerEntity::Phases(phases) => json!({"slug": slug, "phases": phases}),
            ProducerEntity::Tasks(tasks) => json!({"slug": slug, "tasks": tasks}),
        };
        let envelope = self.envelope_json(trace, "producer-output", payload);
        self.substrate.publish_best_effort(subject, &envelope).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_iteration(
        &self,
        slug: &str,
        kind: ReviewKind,
        iteration: u32,
        verdict: &Verdict,
        summary: &str,
        findings: &[Finding],
        request_ids: &[String],
    ) -> Result<(), ReviewLoopError> {
        let mut plan: Plan = self.plan_manager.load_plan(slug).await?;
        let formatted = Finding::format_all(findings);
        *plan.review_fields_mut(kind) = ReviewFields {
            verdict: Some(*verdict),
            summary: Some(summary.to_string()),
            findings: findings.to_vec(),
            formatted_findings: Some(formatted),
            iteration,
        };
        plan.llm_call_history.slot_mut(kind).push(IterationCalls {
            iteration,
            llm_request_ids: request_ids.to_vec(),
            verdict: *verdict,
        });
        plan.touch();
        self.plan_manager.save_plan(&plan).await?;
        Ok(())
    }

    async fn escalate(&self, trace: &TraceContext, kind: ReviewKind, slug: &str, iteration: u32) -> Result<(), ReviewLoopError> {
        let plan = self.plan_manager.load_plan(slug).await?;
        let fields = plan.review_fields(kind);
        let escalate_payload = self.envelope_json(
            trace,
            "escalate",
            json!({
                "slug": slug,
                "reason": "iteration budget exhausted",
                "iteration": iteration,
                "last_verdict": fields.verdict,
                "last_findings": fields.findings,
                "formatted_findings": fields.formatted_findings,
            }),
        );
        self.substrate.publish_json(subjects::escalate_subject(), &escalate_payload).await?;
        let complete_payload = self.envelope_json(trace, "loop_complete", json!({"slug": slug, "iteration": iteration}));
        self.substrate.publish_json(subjects::loop_complete_subject(kind), &complete_payload).await?;
        Ok(())
    }
}

fn summarize_entity(entity: &ProducerEntity) -> String {
    match entity {
        ProducerEntity::Plan { goal, context, scope } => {
            format!("goal: {goal}\ncontext: {context}\nscope.include: {:?}", scope.include)
        }
        ProducerEntity::Phases(phases) => phases
            .iter()
            .map(|p| format!("[{}] {}: {}", p.sequence, p.name, p.description))
            .collect::<Vec<_>>()
            .join("\n"),
        ProducerEntity::Tasks(tasks) => tasks
            .iter()
            .map(|t| format!("[{}] ({}) {}", t.sequence, t.phase_id, t.description))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Classify an error surfaced while handling one trigger message as
/// retryable (NAK) or not (Term) — spec §4.3.4.
pub fn is_retryable(err: &ReviewLoopError) -> bool {
    match err {
        ReviewLoopError::Model(_) => true,
        ReviewLoopError::Focus(_) => true,
        ReviewLoopError::Substrate(_) => true,
        ReviewLoopError::StateIo { .. } => true,
        ReviewLoopError::Plan(plan_err) => plan_err.is_retryable(),
        ReviewLoopError::UnparseableOutput { .. } => false,
        ReviewLoopError::StateCorrupt { .. } => false,
        ReviewLoopError::BudgetExhausted { .. } => false,
        ReviewLoopError::StateMissing { .. } => false,
        ReviewLoopError::StaleIteration { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planloop_types::{Phase, Scope};

    #[test]
    fn summarize_plan_entity_includes_goal() {
        let entity = ProducerEntity::Plan {
            goal: "ship caching".to_string(),
            context: "api layer".to_string(),
            scope: Scope::default(),
        };
        assert!(summarize_entity(&entity).contains("ship caching"));
    }

    #[test]
    fn summarize_phases_entity_lists_each_phase() {
        let entity = ProducerEntity::Phases(vec![Phase::new("add-caching", "p1", 1, "API layer", "desc")]);
        assert!(summarize_entity(&entity).contains("API layer"));
    }

    #[test]
    fn unparseable_output_is_not_retryable() {
        let err = ReviewLoopError::UnparseableOutput {
            kind: "phase".into(),
            slug: "add-caching".into(),
            what: "bad json".into(),
        };
        assert!(!is_retryable(&err));
    }

    #[test]
    fn state_io_is_retryable() {
        let err = ReviewLoopError::StateIo {
            kind: "phase".into(),
            slug: "add-caching".into(),
            source: anyhow::anyhow!("kv unavailable"),
        };
        assert!(is_retryable(&err));
    }
}
