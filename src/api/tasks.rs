use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use planloop_types::ReviewKind;

use super::dto::{AsyncAccepted, TasksApprovedResponse};
use super::{new_request_id, SharedState};
use crate::errors::ApiError;
use crate::review::subjects;

/// Trigger `task-review-loop`; requires the plan approved AND its phases
/// approved (spec §6.1).
pub async fn generate_tasks(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let plan = state.plan_manager.load_plan(&slug).await?;
    if !plan.approved || !plan.phases_approved {
        return Err(ApiError::BadRequest(format!(
            "plan {slug} requires both plan and phase approval before generating tasks"
        )));
    }
    let trace = state.publish_trigger(ReviewKind::Task, &slug, &plan.context).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AsyncAccepted {
            slug,
            request_id: new_request_id(),
            trace_id: trace.trace_id,
            message: "task-review-loop triggered".to_string(),
        }),
    ))
}

pub async fn approve_all_tasks(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let plan = state.plan_manager.approve_tasks_plan(&slug).await?;
    let tasks = state.plan_manager.load_tasks(&slug).await?;
    Ok(Json(TasksApprovedResponse { plan_stage: plan.stage(), tasks }))
}

pub async fn approve_task(
    State(state): State<SharedState>,
    Path((slug, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.plan_manager.approve_task(&slug, &id).await?;
    Ok(Json(task))
}

pub async fn reject_task(
    State(state): State<SharedState>,
    Path((slug, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.plan_manager.reject_task(&slug, &id).await?;
    Ok(Json(task))
}

/// Requires tasks approved (spec §6.1); publishes the batch-dispatch
/// trigger rather than a review-loop trigger, since execution isn't a
/// generate/review/revise loop.
pub async fn execute_plan(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let plan = state.plan_manager.load_plan(&slug).await?;
    if !plan.can_execute() {
        return Err(ApiError::BadRequest(format!("plan {slug} is not ready for execution")));
    }
    let tasks = state.plan_manager.load_tasks(&slug).await?;
    let payload = serde_json::json!({ "slug": slug, "task_ids": tasks.iter().map(|t| &t.id).collect::<Vec<_>>() });
    let trace = state
        .publish_envelope(subjects::execution_trigger_subject(), "task-execution", payload)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AsyncAccepted {
            slug,
            request_id: new_request_id(),
            trace_id: trace.trace_id,
            message: "task execution dispatched".to_string(),
        }),
    ))
}
