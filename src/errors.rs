//! Typed error hierarchy for the planloop orchestrator.
//!
//! One enum per subsystem:
//! - `SubstrateError` — JetStream connection, stream/consumer/bucket provisioning
//! - `ModelError` — model-caller dispatch failures
//! - `FocusError` — focus-coordinator fan-out failures
//! - `ReviewLoopError` — the generic review loop engine
//! - `EventRouterError` — workflow.events.> subscriber
//! - `QuestionError` — gap/question subsystem
//! - `ApiError` — HTTP surface, also `axum::response::IntoResponse`

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("failed to connect to NATS at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: async_nats::ConnectError,
    },

    #[error("failed to provision stream {name}: {source}")]
    StreamProvision {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to provision consumer {name} on stream {stream}: {source}")]
    ConsumerProvision {
        stream: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to provision kv bucket {name}: {source}")]
    BucketProvision {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("publish to {subject} failed: {source}")]
    Publish {
        subject: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("fetch from consumer {consumer} failed: {source}")]
    Fetch {
        consumer: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("envelope on {subject} is neither a wrapped nor raw payload: {reason}")]
    MalformedEnvelope { subject: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no model registered for capability {capability}")]
    NoCapability { capability: String },

    #[error("model call for {capability} exceeded its deadline after {elapsed_ms}ms")]
    DeadlineExceeded { capability: String, elapsed_ms: u64 },

    #[error("model call for {capability} was cancelled")]
    Cancelled { capability: String },

    #[error("model {model} returned a response that failed JSON extraction: {reason}")]
    BadResponse { model: String, reason: String },

    #[error("model call transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum FocusError {
    #[error("focus worker for {focus_id} panicked or was dropped without a result")]
    WorkerLost { focus_id: String },

    #[error("focus session {session_id} not found")]
    SessionNotFound { session_id: String },

    #[error("synthesis of {plan_slug} failed: {reason}")]
    SynthesisFailed { plan_slug: String, reason: String },

    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Error)]
pub enum ReviewLoopError {
    #[error("{kind} loop for {slug} exhausted its iteration budget ({budget})")]
    BudgetExhausted {
        kind: String,
        slug: String,
        budget: u32,
    },

    #[error("{kind} loop for {slug} has no REACTIVE_STATE entry")]
    StateMissing { kind: String, slug: String },

    #[error("{kind} loop for {slug} received a verdict for a stale iteration ({got}, expected {expected})")]
    StaleIteration {
        kind: String,
        slug: String,
        got: u32,
        expected: u32,
    },

    #[error("loop state store error for {kind}/{slug}: {source}")]
    StateIo {
        kind: String,
        slug: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("malformed loop state for {kind}/{slug}: {source}")]
    StateCorrupt {
        kind: String,
        slug: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} producer/reviewer output for {slug} was not parseable JSON: {what}")]
    UnparseableOutput {
        kind: String,
        slug: String,
        what: String,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Focus(#[from] FocusError),

    #[error(transparent)]
    Plan(#[from] planloop_types::PlanManagerError),

    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}

#[derive(Debug, Error)]
pub enum EventRouterError {
    #[error("unrecognized event type {0} on workflow.events.>")]
    UnknownEventType(String),

    #[error("malformed {event} payload: {reason}")]
    BadPayload { event: String, reason: String },

    #[error("escalation target {plan_slug}/{pointer} could not be resolved: {reason}")]
    EscalationUnresolved {
        plan_slug: String,
        pointer: String,
        reason: String,
    },

    #[error(transparent)]
    Plan(#[from] planloop_types::PlanManagerError),

    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}

#[derive(Debug, Error)]
pub enum QuestionError {
    #[error("question {id} not found")]
    NotFound { id: String },

    #[error("no route matched topic {topic}")]
    NoRoute { topic: String },

    #[error("question {id} already answered")]
    AlreadyAnswered { id: String },

    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}

/// The single error type every HTTP handler returns; converts to a JSON
/// body plus the appropriate status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Plan(#[from] planloop_types::PlanManagerError),

    #[error(transparent)]
    Question(#[from] QuestionError),

    #[error("request body exceeded the size limit")]
    PayloadTooLarge,

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Plan(planloop_types::PlanManagerError::PlanNotFound { .. })
            | ApiError::Plan(planloop_types::PlanManagerError::PhaseNotFound { .. })
            | ApiError::Plan(planloop_types::PlanManagerError::TaskNotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Plan(planloop_types::PlanManagerError::AlreadyApproved { .. }) => {
                StatusCode::OK
            }
            ApiError::Plan(planloop_types::PlanManagerError::InvalidTransition { .. })
            | ApiError::Plan(planloop_types::PlanManagerError::TasksAlreadyApproved { .. })
            | ApiError::Plan(planloop_types::PlanManagerError::PhaseInvalidStatus { .. })
            | ApiError::Plan(planloop_types::PlanManagerError::TaskNotPendingApproval { .. })
            | ApiError::Plan(planloop_types::PlanManagerError::PlanNotUpdatable { .. })
            | ApiError::Plan(planloop_types::PlanManagerError::PlanNotDeletable { .. }) => {
                StatusCode::CONFLICT
            }
            ApiError::Question(QuestionError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Question(QuestionError::AlreadyAnswered { .. }) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_loop_error_converts_from_plan_manager_error() {
        let inner = planloop_types::PlanManagerError::PlanNotFound {
            slug: "add-caching".into(),
        };
        let err: ReviewLoopError = inner.into();
        assert!(matches!(err, ReviewLoopError::Plan(_)));
    }

    #[test]
    fn budget_exhausted_message_contains_slug_and_budget() {
        let err = ReviewLoopError::BudgetExhausted {
            kind: "plan".into(),
            slug: "add-caching".into(),
            budget: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("add-caching"));
        assert!(msg.contains('5'));
    }

    #[test]
    fn already_approved_maps_to_ok_status() {
        let err = ApiError::Plan(planloop_types::PlanManagerError::AlreadyApproved {
            slug: "add-caching".into(),
        });
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn plan_not_found_maps_to_404() {
        let err = ApiError::Plan(planloop_types::PlanManagerError::PlanNotFound {
            slug: "missing".into(),
        });
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_transition_maps_to_conflict() {
        let err = ApiError::Plan(planloop_types::PlanManagerError::InvalidTransition {
            slug: "add-caching".into(),
            from: "drafting".into(),
            to: "complete".into(),
        });
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
