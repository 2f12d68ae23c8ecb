use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use planloop_types::{PlanManagerError, ReviewKind};

use super::dto::{AsyncAccepted, PhaseList, ReorderPhasesRequest};
use super::{new_request_id, SharedState};
use crate::errors::ApiError;

/// Trigger `phase-review-loop`; 400 unless the plan itself is approved
/// (spec §6.1).
pub async fn generate_phases(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let plan = state.plan_manager.load_plan(&slug).await?;
    if !plan.approved {
        return Err(ApiError::BadRequest(format!("plan {slug} is not approved")));
    }
    let trace = state.publish_trigger(ReviewKind::Phase, &slug, &plan.context).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AsyncAccepted {
            slug,
            request_id: new_request_id(),
            trace_id: trace.trace_id,
            message: "phase-review-loop triggered".to_string(),
        }),
    ))
}

pub async fn approve_phase(
    State(state): State<SharedState>,
    Path((slug, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = state.plan_manager.approve_phase(&slug, &id).await?;
    Ok(Json(phase))
}

pub async fn reject_phase(
    State(state): State<SharedState>,
    Path((slug, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = state.plan_manager.reject_phase(&slug, &id).await?;
    Ok(Json(phase))
}

pub async fn approve_all_phases(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let phases = state.plan_manager.approve_all_phases(&slug).await?;
    Ok(Json(PhaseList { phases }))
}

/// Reorders every named phase to the position implied by its index in
/// `phase_ids`; unknown ids are rejected rather than silently skipped.
pub async fn reorder_phases(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    Json(req): Json<ReorderPhasesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut phases = state.plan_manager.load_phases(&slug).await?;
    for (position, id) in req.phase_ids.iter().enumerate() {
        let phase = phases
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or_else(|| PlanManagerError::PhaseNotFound { slug: slug.clone(), phase_id: id.clone() })?;
        phase.sequence = position as u32 + 1;
    }
    phases.sort_by_key(|p| p.sequence);
    state.plan_manager.save_phases(&slug, &phases).await?;
    Ok(Json(PhaseList { phases }))
}
