use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use planloop_types::{MessageEnvelope, MessageType, PlanManagerError, ReviewKind, TraceContext};

use super::dto::{
    CreatePlanResponse, CreatePlanRequest, DeleteQuery, PlanWithStatus, PromoteResponse, UpdatePlanRequest,
};
use super::{new_request_id, SharedState};
use crate::errors::ApiError;
use crate::review::promote::promote_and_wait;
use crate::review::subjects;

pub async fn create_plan(
    State(state): State<SharedState>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<Response, ApiError> {
    let slug = crate::plan::derive_slug(&req.description);
    if let Ok(existing) = state.plan_manager.load_plan(&slug).await {
        return Ok((StatusCode::OK, Json(PlanWithStatus::from(existing))).into_response());
    }

    let plan = state.plan_manager.create_plan(&req.description).await?;
    let trace = state.publish_trigger(ReviewKind::Plan, &plan.slug, &req.description).await?;

    let body = CreatePlanResponse {
        slug: plan.slug,
        request_id: new_request_id(),
        trace_id: trace.trace_id,
        message: "plan-review-loop triggered".to_string(),
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn list_plans(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let plans = state.plan_manager.list_plans().await?;
    let with_status: Vec<PlanWithStatus> = plans.into_iter().map(PlanWithStatus::from).collect();
    Ok(Json(with_status))
}

pub async fn get_plan(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let plan = state.plan_manager.load_plan(&slug).await?;
    Ok(Json(PlanWithStatus::from(plan)))
}

pub async fn update_plan(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    Json(req): Json<UpdatePlanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut plan = state.plan_manager.load_plan(&slug).await?;
    if matches!(plan.status, planloop_types::PlanStatus::Implementing | planloop_types::PlanStatus::Complete) {
        return Err(ApiError::Plan(PlanManagerError::PlanNotUpdatable { slug }));
    }
    if let Some(title) = req.title {
        plan.title = title;
    }
    if let Some(goal) = req.goal {
        plan.goal = goal;
    }
    if let Some(context) = req.context {
        plan.context = context;
    }
    plan.touch();
    state.plan_manager.save_plan(&plan).await?;
    Ok(Json(PlanWithStatus::from(plan)))
}

pub async fn delete_plan(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if query.archive {
        let plan = state.plan_manager.archive_plan(&slug).await?;
        return Ok((StatusCode::OK, Json(PlanWithStatus::from(plan))).into_response());
    }
    state.plan_manager.delete_plan(&slug).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Legacy synchronous promote (spec §4.3.3): subscribe before publishing,
/// then block up to the wait's timeout for the plan-review result.
pub async fn promote_plan(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let plan = state.plan_manager.load_plan(&slug).await?;
    let request_id = new_request_id();
    let description = plan.context.clone();
    let trace = TraceContext::new();

    let result = promote_and_wait(
        &state.substrate,
        &state.workflow_stream,
        ReviewKind::Plan.as_str(),
        &slug,
        &request_id,
        || {
            let state = state.clone();
            let slug = slug.clone();
            let trace_id = trace.trace_id.clone();
            async move {
                let envelope = MessageEnvelope::new(
                    MessageType::new("workflow", "trigger", "v1"),
                    serde_json::json!({ "slug": slug, "description": description }),
                    "workflow-api",
                    trace_id,
                );
                let payload = serde_json::to_value(&envelope).expect("envelope always serializes");
                state.substrate.publish_json(subjects::trigger_subject(ReviewKind::Plan), &payload).await
            }
        },
    )
    .await
    .map_err(|e| ApiError::Other(e.into()))?;

    match result {
        Some(value) => Ok((StatusCode::OK, Json(value)).into_response()),
        None => {
            let reloaded = state.plan_manager.load_plan(&slug).await?;
            let response = PromoteResponse {
                slug: reloaded.slug.clone(),
                stage: reloaded.stage(),
                active_loops: reloaded.active_loops(),
            };
            Ok((StatusCode::OK, Json(response)).into_response())
        }
    }
}
