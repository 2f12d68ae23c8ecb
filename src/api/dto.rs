//! Request/response shapes for the HTTP surface. Kept separate from the
//! domain types in `planloop-types` — these are wire contracts, not
//! persisted documents, and some (`PlanWithStatus`) add fields the domain
//! type deliberately doesn't carry.

use planloop_types::{Phase, Plan, PlanStage, ReviewFields, ReviewKind, Task};
use serde::{Deserialize, Serialize};

/// The embedded `Plan` document is flattened to top-level fields (no
/// `"plan": {...}` nesting) and `active_loops` is always an array, never
/// absent, even when empty — both asserted by the JSON contract tests.
#[derive(Debug, Serialize)]
pub struct PlanWithStatus {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(flatten)]
    pub plan: Plan,
    pub stage: PlanStage,
    pub active_loops: Vec<ReviewKind>,
}

impl From<Plan> for PlanWithStatus {
    fn from(plan: Plan) -> Self {
        let id = plan.slug.clone();
        let stage = plan.stage();
        let active_loops = plan.active_loops();
        Self {
            id,
            project_id: None,
            plan,
            stage,
            active_loops,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePlanResponse {
    pub slug: String,
    pub request_id: String,
    pub trace_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdatePlanRequest {
    pub title: Option<String>,
    pub goal: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DeleteQuery {
    #[serde(default)]
    pub archive: bool,
}

/// Every endpoint that fires a trigger and returns before the loop finishes
/// answers with the same shape: enough for the caller to correlate the
/// eventual result event.
#[derive(Debug, Serialize)]
pub struct AsyncAccepted {
    pub slug: String,
    pub request_id: String,
    pub trace_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct PromoteResponse {
    pub slug: String,
    pub stage: PlanStage,
    pub active_loops: Vec<ReviewKind>,
}

#[derive(Debug, Deserialize)]
pub struct ReorderPhasesRequest {
    pub phase_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ReviewsResponse {
    pub slug: String,
    pub plan_review: ReviewFields,
    pub phase_review: ReviewFields,
    pub task_review: ReviewFields,
}

#[derive(Debug, Serialize)]
pub struct PhaseList {
    pub phases: Vec<Phase>,
}

#[derive(Debug, Serialize)]
pub struct TasksApprovedResponse {
    pub plan_stage: PlanStage,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerQuestionRequest {
    pub answer: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_with_status_flattens_plan_fields_to_top_level() {
        let plan = Plan::new("add-caching", "Add caching");
        let with_status = PlanWithStatus::from(plan);
        let json = serde_json::to_value(&with_status).unwrap();
        assert!(json.get("plan").is_none());
        assert_eq!(json["slug"], "add-caching");
        assert_eq!(json["id"], "add-caching");
    }

    #[test]
    fn plan_with_status_active_loops_is_array_never_absent() {
        let plan = Plan::new("add-caching", "Add caching");
        let with_status = PlanWithStatus::from(plan);
        let json = serde_json::to_value(&with_status).unwrap();
        assert!(json.get("active_loops").is_some());
        assert_eq!(json["active_loops"], serde_json::json!([]));
    }

    #[test]
    fn plan_with_status_carries_required_contract_keys() {
        let plan = Plan::new("add-caching", "Add caching");
        let json = serde_json::to_value(PlanWithStatus::from(plan)).unwrap();
        for key in ["id", "slug", "title", "project_id", "approved", "created_at", "stage", "active_loops"] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
    }
}
