use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use planloop_types::ReviewKind;

use super::dto::AnswerQuestionRequest;
use super::SharedState;
use crate::errors::ApiError;

/// A question's topic is `"{kind}.gap.scope"` (set when the review loop
/// engine files it); the leading segment is the kind to re-trigger.
fn kind_from_topic(topic: &str) -> Option<ReviewKind> {
    match topic.split('.').next()? {
        "plan" => Some(ReviewKind::Plan),
        "phase" => Some(ReviewKind::Phase),
        "task" => Some(ReviewKind::Task),
        _ => None,
    }
}

/// Answer a pending question and resume the loop it paused (spec §8
/// scenario 4: the workflow stays paused until an answer event arrives).
/// Re-fires the owning loop's trigger so the next fetch picks the slug back
/// up; the engine's own pending-question check then lets it proceed.
pub async fn answer_question(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<AnswerQuestionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let question = state
        .question_store
        .answer(&id, &req.answer, &serde_json::json!({ "answer": req.answer }))
        .await?;

    if let (Some(slug), Some(kind)) = (question.slug.clone(), kind_from_topic(&question.topic)) {
        let plan = state.plan_manager.load_plan(&slug).await?;
        state.publish_trigger(kind, &slug, &plan.context).await?;
    }

    Ok(Json(question))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_topic_reads_leading_segment() {
        assert_eq!(kind_from_topic("phase.gap.scope"), Some(ReviewKind::Phase));
        assert_eq!(kind_from_topic("task.gap.scope"), Some(ReviewKind::Task));
    }

    #[test]
    fn kind_from_topic_rejects_unknown_prefix() {
        assert_eq!(kind_from_topic("unknown.gap.scope"), None);
    }
}
