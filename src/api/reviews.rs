use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use super::dto::ReviewsResponse;
use super::SharedState;
use crate::errors::ApiError;

/// "Latest synthesized review as stored step output" (spec §6.1): the
/// plan document is itself the authority for review progress, so this just
/// projects its three `ReviewFields` slots.
pub async fn get_reviews(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let plan = state.plan_manager.load_plan(&slug).await?;
    Ok(Json(ReviewsResponse {
        slug: plan.slug,
        plan_review: plan.plan_review,
        phase_review: plan.phase_review,
        task_review: plan.task_review,
    }))
}
