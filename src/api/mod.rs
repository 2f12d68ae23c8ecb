//! The thin HTTP REST surface (spec §6.1): every route under
//! `/workflow-api/` either mutates a plan/phase/task document directly
//! through [`PlanManager`] or fires a `workflow.trigger.<loop-name>` message
//! and returns 202 without waiting for the loop to finish — the one
//! exception is the legacy synchronous promote path, which blocks on the
//! corresponding `workflow.result.<kind>.<slug>` subject (spec §4.3.3).

mod dto;
mod phases;
mod plans;
mod questions;
mod reviews;
mod tasks;

use std::sync::Arc;

use async_nats::jetstream::stream::Stream as JsStream;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post, put};
use axum::Router;
use planloop_types::{MessageEnvelope, MessageType, ReviewKind, TraceContext};
use uuid::Uuid;

use crate::errors::{ApiError, SubstrateError};
use crate::plan::PlanManager;
use crate::questions::QuestionStore;
use crate::review::subjects;
use crate::substrate::Substrate;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Everything a handler needs: the plan manager, the substrate handle for
/// publishing triggers, the provisioned `WORKFLOW` stream (the promote path
/// needs it directly to create an ephemeral consumer before publishing),
/// and the question store for the gap/question subsystem's own read paths.
pub struct AppState {
    pub plan_manager: Arc<PlanManager>,
    pub substrate: Arc<Substrate>,
    pub workflow_stream: JsStream,
    pub question_store: Arc<QuestionStore>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Publish `subject` wrapped in a full envelope, so the consumer's
    /// `parse_envelope` preserves the trace id the caller gets back in its
    /// response (spec §8: "the result's trace_id equals the trigger's
    /// trace_id"). Every handler that fires an async trigger goes through
    /// this rather than publishing a bare payload.
    async fn publish_envelope(
        &self,
        subject: impl Into<String>,
        category: &str,
        payload: serde_json::Value,
    ) -> Result<TraceContext, ApiError> {
        let trace = TraceContext::new();
        let envelope = MessageEnvelope::new(
            MessageType::new("workflow", category, "v1"),
            payload,
            "workflow-api",
            trace.trace_id.clone(),
        );
        let value = serde_json::to_value(&envelope)
            .map_err(|e| ApiError::Other(anyhow::Error::from(e)))?;
        self.substrate
            .publish_json(subject, &value)
            .await
            .map_err(|e: SubstrateError| ApiError::Other(e.into()))?;
        Ok(trace)
    }

    /// Publish a `workflow.trigger.<loop-name>` message for a review loop.
    async fn publish_trigger(
        &self,
        kind: ReviewKind,
        slug: &str,
        description: &str,
    ) -> Result<TraceContext, ApiError> {
        self.publish_envelope(
            subjects::trigger_subject(kind),
            "trigger",
            serde_json::json!({ "slug": slug, "description": description }),
        )
        .await
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Build the full `/workflow-api/` router. Uses `{param}` path syntax
/// (axum 0.8), not the `:param` syntax of earlier axum releases.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/workflow-api/plans", get(plans::list_plans).post(plans::create_plan))
        .route(
            "/workflow-api/plans/{slug}",
            get(plans::get_plan).patch(plans::update_plan).delete(plans::delete_plan),
        )
        .route("/workflow-api/plans/{slug}/promote", post(plans::promote_plan))
        .route("/workflow-api/plans/{slug}/reviews", get(reviews::get_reviews))
        .route("/workflow-api/plans/{slug}/phases/generate", post(phases::generate_phases))
        .route("/workflow-api/plans/{slug}/phases/approve", post(phases::approve_all_phases))
        .route("/workflow-api/plans/{slug}/phases/reorder", put(phases::reorder_phases))
        .route(
            "/workflow-api/plans/{slug}/phases/{id}/approve",
            post(phases::approve_phase),
        )
        .route(
            "/workflow-api/plans/{slug}/phases/{id}/reject",
            post(phases::reject_phase),
        )
        .route("/workflow-api/plans/{slug}/tasks/generate", post(tasks::generate_tasks))
        .route("/workflow-api/plans/{slug}/tasks/approve", post(tasks::approve_all_tasks))
        .route("/workflow-api/plans/{slug}/tasks/{id}/approve", post(tasks::approve_task))
        .route("/workflow-api/plans/{slug}/tasks/{id}/reject", post(tasks::reject_task))
        .route("/workflow-api/plans/{slug}/execute", post(tasks::execute_plan))
        .route("/workflow-api/questions/{id}/answer", post(questions::answer_question))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_id_is_not_empty() {
        assert!(!new_request_id().is_empty());
    }
}
