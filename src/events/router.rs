//! The event router (spec §4.4): the sole writer of plan status and
//! approval fields. Subscribes to `workflow.events.>` for review-loop
//! outcomes and to `user.signal.>` for escalation/error annotation,
//! dispatching by subject and always acking — bad data is logged and
//! dropped rather than redelivered, since redelivery cannot fix it.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::stream::Stream as JsStream;
use planloop_types::{Plan, PlanStatus, ReviewKind, Verdict};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use crate::errors::{EventRouterError, SubstrateError};
use crate::plan::PlanManager;
use crate::substrate::{ack, parse_envelope, ConsumerSpec, Substrate};

const FETCH_WAIT: Duration = Duration::from_secs(5);
const FETCH_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const EVENTS_CONSUMER: &str = "workflow-api-events";
const SIGNALS_CONSUMER: &str = "workflow-api-signals";

#[derive(Debug, Deserialize)]
struct ApprovalPayload {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct LoopCompletePayload {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct EscalatePayload {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
    error: String,
}

pub struct EventRouter {
    substrate: Arc<Substrate>,
    plan_manager: Arc<PlanManager>,
    events_consumer: PullConsumer,
    signals_consumer: PullConsumer,
}

impl EventRouter {
    pub async fn new(
        substrate: Arc<Substrate>,
        plan_manager: Arc<PlanManager>,
        workflow_stream: &JsStream,
        user_signal_stream: &JsStream,
    ) -> Result<Self, SubstrateError> {
        let events_spec = ConsumerSpec::new(EVENTS_CONSUMER, "workflow.events.>").with_deliver_new();
        let events_consumer = substrate.consumer(workflow_stream, &events_spec).await?;

        let signals_spec = ConsumerSpec::new(SIGNALS_CONSUMER, "user.signal.>").with_deliver_new();
        let signals_consumer = substrate.consumer(user_signal_stream, &signals_spec).await?;

        Ok(Self {
            substrate,
            plan_manager,
            events_consumer,
            signals_consumer,
        })
    }

    /// Drive both the `workflow.events.>` and `user.signal.>` fetch loops
    /// until `cancel` fires.
    pub async fn run(&self, cancel: &tokio_util::sync::CancellationToken) -> Result<(), SubstrateError> {
        tokio::try_join!(self.run_events(cancel), self.run_signals(cancel))?;
        Ok(())
    }

    async fn run_events(&self, cancel: &tokio_util::sync::CancellationToken) -> Result<(), SubstrateError> {
        while !cancel.is_cancelled() {
            let batch = match Substrate::fetch_batch(&self.events_consumer, 1, FETCH_WAIT).await {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(error = %err, "workflow.events fetch failed, retrying");
                    tokio::time::sleep(FETCH_RETRY_BACKOFF).await;
                    continue;
                }
            };
            for message in batch {
                self.handle_event(&message).await;
            }
        }
        Ok(())
    }

    async fn run_signals(&self, cancel: &tokio_util::sync::CancellationToken) -> Result<(), SubstrateError> {
        while !cancel.is_cancelled() {
            let batch = match Substrate::fetch_batch(&self.signals_consumer, 1, FETCH_WAIT).await {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(error = %err, "user.signal fetch failed, retrying");
                    tokio::time::sleep(FETCH_RETRY_BACKOFF).await;
                    continue;
                }
            };
            for message in batch {
                self.handle_signal(&message).await;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, message), fields(subject = %message.subject))]
    async fn handle_event(&self, message: &async_nats::jetstream::Message) {
        let subject = message.subject.to_string();
        // ACK happens regardless of outcome: a malformed or unhandleable
        // event cannot be fixed by redelivery (spec §4.4 step 6).
        ack(message).await;

        let parsed = match parse_envelope(&subject, &message.payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(error = %err, %subject, "unparseable workflow event, dropped");
                return;
            }
        };

        if let Err(err) = self.dispatch_event(&subject, parsed.payload).await {
            error!(error = %err, %subject, "workflow event handler failed, dropped");
        }
    }

    #[instrument(skip(self, message), fields(subject = %message.subject))]
    async fn handle_signal(&self, message: &async_nats::jetstream::Message) {
        let subject = message.subject.to_string();
        ack(message).await;

        let parsed = match parse_envelope(&subject, &message.payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(error = %err, %subject, "unparseable user signal, dropped");
                return;
            }
        };

        let result = if subject == crate::review::subjects::error_subject() {
            self.handle_error_annotation(parsed.payload).await
        } else if subject == crate::review::subjects::escalate_subject() {
            self.handle_escalate(parsed.payload).await
        } else {
            Err(EventRouterError::UnknownEventType(subject.clone()))
        };

        if let Err(err) = result {
            error!(error = %err, %subject, "user signal handler failed, dropped");
        }
    }

    async fn dispatch_event(&self, subject: &str, payload: Value) -> Result<(), EventRouterError> {
        match subject {
            "workflow.events.plan.approved" => self.handle_approval(ReviewKind::Plan, payload).await,
            "workflow.events.phase.approved" => self.handle_approval(ReviewKind::Phase, payload).await,
            "workflow.events.task.approved" => self.handle_approval(ReviewKind::Task, payload).await,
            "workflow.events.plan.revision_needed" => self.handle_revision_needed(ReviewKind::Plan, payload).await,
            "workflow.events.phase.revision_needed" => self.handle_revision_needed(ReviewKind::Phase, payload).await,
            "workflow.events.task.revision_needed" => self.handle_revision_needed(ReviewKind::Task, payload).await,
            "workflow.events.plan.loop_complete" => self.handle_loop_complete(ReviewKind::Plan, payload).await,
            "workflow.events.phase.loop_complete" => self.handle_loop_complete(ReviewKind::Phase, payload).await,
            "workflow.events.task.loop_complete" => self.handle_loop_complete(ReviewKind::Task, payload).await,
            "workflow.events.task.execution_complete" => self.handle_execution_complete(payload).await,
            other => Err(EventRouterError::UnknownEventType(other.to_string())),
        }
    }

    /// Step 4 (approval branch): check `CanTransitionTo`, set status, set
    /// the approval boolean + timestamp. `AlreadyApproved` is success.
    async fn handle_approval(&self, kind: ReviewKind, payload: Value) -> Result<(), EventRouterError> {
        let parsed: ApprovalPayload = serde_json::from_value(payload)
            .map_err(|e| EventRouterError::BadPayload { event: "approval".to_string(), reason: e.to_string() })?;

        let result = match kind {
            ReviewKind::Plan => self.plan_manager.approve_plan(&parsed.slug).await,
            ReviewKind::Phase => self.plan_manager.approve_phase_plan(&parsed.slug).await,
            ReviewKind::Task => self.plan_manager.approve_tasks_plan(&parsed.slug).await,
        };

        let plan = match result {
            Ok(plan) => plan,
            Err(planloop_types::PlanManagerError::AlreadyApproved { .. })
            | Err(planloop_types::PlanManagerError::TasksAlreadyApproved { .. }) => {
                info!(slug = %parsed.slug, %kind, "approval event for an already-approved loop, treated as success");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        self.publish_plan_to_graph(&plan).await;
        Ok(())
    }

    /// Revision-needed events carry no status transition of their own: the
    /// review loop engine already persisted findings/iteration/verdict
    /// directly to the plan before publishing. The router's job here is
    /// only to fan the refreshed plan out to the graph.
    async fn handle_revision_needed(&self, kind: ReviewKind, payload: Value) -> Result<(), EventRouterError> {
        let parsed: LoopCompletePayload = serde_json::from_value(payload)
            .map_err(|e| EventRouterError::BadPayload { event: "revision_needed".to_string(), reason: e.to_string() })?;
        let plan = self.plan_manager.load_plan(&parsed.slug).await?;
        let _ = kind;
        self.publish_plan_to_graph(&plan).await;
        Ok(())
    }

    /// Step 4 (escalation branch): the loop that just exhausted its budget
    /// is already known from the subject, so mark that slot escalated and
    /// reject the plan when the transition is legal.
    async fn handle_loop_complete(&self, kind: ReviewKind, payload: Value) -> Result<(), EventRouterError> {
        let parsed: LoopCompletePayload = serde_json::from_value(payload)
            .map_err(|e| EventRouterError::BadPayload { event: "loop_complete".to_string(), reason: e.to_string() })?;
        self.mark_escalated(&parsed.slug, kind).await
    }

    /// `user.signal.escalate` carries no `kind` tag, so the escalated loop
    /// is inferred from which iteration counter is non-zero, highest-stakes
    /// loop first (task > phase > plan) — spec §4.4 step 4.
    async fn handle_escalate(&self, payload: Value) -> Result<(), EventRouterError> {
        let parsed: EscalatePayload = serde_json::from_value(payload)
            .map_err(|e| EventRouterError::BadPayload { event: "escalate".to_string(), reason: e.to_string() })?;
        let Some(slug) = parsed.slug else {
            // Task-execution escalations carry a task_id instead of a plan
            // slug; there is no plan-level transition to apply for those.
            info!(task_id = ?parsed.task_id, "escalation with no plan slug, nothing to transition");
            return Ok(());
        };
        let plan = self.plan_manager.load_plan(&slug).await?;
        let kind = escalating_kind(&plan).ok_or_else(|| EventRouterError::EscalationUnresolved {
            plan_slug: slug.clone(),
            pointer: "review iteration counters".to_string(),
            reason: "no review kind has a non-zero iteration".to_string(),
        })?;
        self.mark_escalated(&slug, kind).await
    }

    async fn mark_escalated(&self, slug: &str, kind: ReviewKind) -> Result<(), EventRouterError> {
        let mut plan = self.plan_manager.load_plan(slug).await?;
        plan.review_fields_mut(kind).verdict = Some(Verdict::Escalated);
        if plan.status.can_transition_to(PlanStatus::Rejected) {
            plan.status = PlanStatus::Rejected;
        }
        plan.touch();
        self.plan_manager.save_plan(&plan).await?;
        self.publish_plan_to_graph(&plan).await;
        Ok(())
    }

    /// Error-annotation handler (spec §4.4): writes `last_error` /
    /// `last_error_at` only. Never transitions status — retry budget may
    /// still remain.
    async fn handle_error_annotation(&self, payload: Value) -> Result<(), EventRouterError> {
        let parsed: ErrorPayload = serde_json::from_value(payload)
            .map_err(|e| EventRouterError::BadPayload { event: "error".to_string(), reason: e.to_string() })?;
        let Some(slug) = parsed.slug else {
            info!(task_id = ?parsed.task_id, error = %parsed.error, "error signal with no plan slug, nothing to annotate");
            return Ok(());
        };
        let mut plan = self.plan_manager.load_plan(&slug).await?;
        plan.record_error(parsed.error);
        self.plan_manager.save_plan(&plan).await?;
        Ok(())
    }

    async fn handle_execution_complete(&self, payload: Value) -> Result<(), EventRouterError> {
        let parsed: LoopCompletePayload = serde_json::from_value(payload).map_err(|e| {
            EventRouterError::BadPayload { event: "execution_complete".to_string(), reason: e.to_string() }
        })?;
        info!(slug = %parsed.slug, "task execution complete");
        Ok(())
    }

    /// Best-effort fan-out of the refreshed plan entity to the graph
    /// ingester's inbound subject. Never fails the handler.
    async fn publish_plan_to_graph(&self, plan: &Plan) {
        let subject = crate::review::subjects::result_subject("plan-entity", &plan.slug);
        self.substrate.publish_best_effort(subject, &json!(plan)).await;
    }
}

/// Which review kind currently holds an escalation, by precedence
/// task > phase > plan (spec §4.4 step 4).
fn escalating_kind(plan: &Plan) -> Option<ReviewKind> {
    if plan.task_review.iteration > 0 {
        Some(ReviewKind::Task)
    } else if plan.phase_review.iteration > 0 {
        Some(ReviewKind::Phase)
    } else if plan.plan_review.iteration > 0 {
        Some(ReviewKind::Plan)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalating_kind_prefers_task_over_phase_and_plan() {
        let mut plan = Plan::new("add-caching", "Add caching");
        plan.plan_review.iteration = 2;
        plan.phase_review.iteration = 1;
        plan.task_review.iteration = 3;
        assert_eq!(escalating_kind(&plan), Some(ReviewKind::Task));
    }

    #[test]
    fn escalating_kind_falls_back_to_phase_then_plan() {
        let mut plan = Plan::new("add-caching", "Add caching");
        plan.phase_review.iteration = 1;
        assert_eq!(escalating_kind(&plan), Some(ReviewKind::Phase));

        let mut plan_only = Plan::new("add-caching", "Add caching");
        plan_only.plan_review.iteration = 1;
        assert_eq!(escalating_kind(&plan_only), Some(ReviewKind::Plan));
    }

    #[test]
    fn escalating_kind_none_when_nothing_has_run() {
        let plan = Plan::new("add-caching", "Add caching");
        assert_eq!(escalating_kind(&plan), None);
    }
}
