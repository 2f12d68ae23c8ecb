//! Producer role (spec §4.3.2.b): for the plan loop this is the focus
//! coordinator; for phase/task loops it is a direct LLM call against a
//! generator prompt. All three return the entity the review loop persists
//! and the request ids spent making it.

use std::sync::Arc;

use async_trait::async_trait;
use planloop_types::{Gap, Phase, Scope, Task, TaskType, Urgency};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::errors::ReviewLoopError;
use crate::focus::{FocusCoordinator, Trigger as FocusTrigger};
use crate::model::{extract_json, CompletionRequest, Message, ModelCaller};
use crate::questions::parse_gaps;
use planloop_types::TraceContext;

/// What a producer hands back to the engine to persist. Each review kind
/// produces a different shape of entity; the engine matches on the variant
/// that corresponds to the kind it is running.
pub enum ProducerEntity {
    Plan { goal: String, context: String, scope: Scope },
    Phases(Vec<Phase>),
    Tasks(Vec<Task>),
}

pub struct ProducerOutput {
    /// `None` when a blocking gap left the producer with nothing to persist
    /// — the engine pauses the loop on a question instead of treating this
    /// as a parse failure.
    pub entity: Option<ProducerEntity>,
    pub request_ids: Vec<String>,
    /// Gaps extracted from the raw output before entity parsing (spec §8):
    /// blocking gaps pause the loop, advisory ones are just recorded.
    pub gaps: Vec<Gap>,
}

#[async_trait]
pub trait Producer: Send + Sync {
    /// `previous_findings` is the formatted findings report from the prior
    /// iteration, when one exists — folded into the prompt as "previous
    /// review findings, revise accordingly" (spec §4.3.2.b).
    async fn produce(
        &self,
        trace: &TraceContext,
        slug: &str,
        description: &str,
        previous_findings: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ProducerOutput, ReviewLoopError>;
}

pub struct PlanProducer {
    focus: Arc<FocusCoordinator>,
}

impl PlanProducer {
    pub fn new(focus: Arc<FocusCoordinator>) -> Self {
        Self { focus }
    }
}

#[async_trait]
impl Producer for PlanProducer {
    async fn produce(
        &self,
        trace: &TraceContext,
        slug: &str,
        description: &str,
        previous_findings: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ProducerOutput, ReviewLoopError> {
        let mut trigger = FocusTrigger::new(slug, description);
        if let Some(findings) = previous_findings {
            trigger.graph_context = Some(format!("previous review findings, revise accordingly:\n{findings}"));
        }
        let synthesized = self.focus.coordinate(trace, trigger, cancel).await?;

        let goal_result = parse_gaps(&synthesized.goal);
        let context_result = parse_gaps(&synthesized.context);
        let mut gaps = goal_result.gaps;
        gaps.extend(context_result.gaps);

        if gaps.iter().any(|g| g.urgency == Urgency::Blocking) {
            return Ok(ProducerOutput {
                entity: None,
                request_ids: synthesized.request_ids,
                gaps,
            });
        }

        Ok(ProducerOutput {
            entity: Some(ProducerEntity::Plan {
                goal: goal_result.cleaned_output,
                context: context_result.cleaned_output,
                scope: synthesized.scope,
            }),
            request_ids: synthesized.request_ids,
            gaps,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PhaseDraft {
    name: String,
    description: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PhaseGeneratorOutput {
    #[serde(default)]
    phases: Vec<PhaseDraft>,
}

pub struct PhaseProducer {
    model: Arc<ModelCaller>,
}

impl PhaseProducer {
    pub fn new(model: Arc<ModelCaller>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Producer for PhaseProducer {
    async fn produce(
        &self,
        trace: &TraceContext,
        slug: &str,
        description: &str,
        previous_findings: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ProducerOutput, ReviewLoopError> {
        let mut prompt = format!(
            "Break plan '{slug}' into an ordered sequence of phases.\nPlan description: {description}\nRespond as JSON: {{\"phases\": [{{\"name\": ..., \"description\": ..., \"dependencies\": [...]}}]}}"
        );
        if let Some(findings) = previous_findings {
            prompt.push_str(&format!("\n\nPrevious review findings, revise accordingly:\n{findings}"));
        }

        let request = CompletionRequest::new(
            "planning",
            vec![
                Message::system("You decompose an approved plan into phases. Respond with JSON only."),
                Message::user(prompt),
            ],
        );
        let response = self.model.complete(trace, request, cancel).await?;
        let request_id = response.request_id.clone();

        let gap_result = parse_gaps(&response.content);
        if gap_result.gaps.iter().any(|g| g.urgency == Urgency::Blocking) {
            return Ok(ProducerOutput {
                entity: None,
                request_ids: vec![request_id],
                gaps: gap_result.gaps,
            });
        }

        let parsed: PhaseGeneratorOutput = extract_json(&gap_result.cleaned_output)
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| ReviewLoopError::UnparseableOutput {
                kind: "phase".to_string(),
                slug: slug.to_string(),
                what: "phase generator did not return a {\"phases\": [...]} JSON array".to_string(),
            })?;

        let phases = parsed
            .phases
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                let mut phase = Phase::new(slug, format!("{slug}-phase-{}", i + 1), (i + 1) as u32, draft.name, draft.description);
                phase.dependencies = draft.dependencies;
                phase
            })
            .collect();

        Ok(ProducerOutput {
            entity: Some(ProducerEntity::Phases(phases)),
            request_ids: vec![request_id],
            gaps: gap_result.gaps,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TaskDraft {
    phase_id: String,
    description: String,
    #[serde(rename = "type", default = "default_task_type")]
    task_type: TaskType,
    #[serde(default)]
    acceptance_criteria: Vec<AcceptanceCriterionDraft>,
    #[serde(default)]
    depends_on: Vec<String>,
}

fn default_task_type() -> TaskType {
    TaskType::Implement
}

#[derive(Debug, Deserialize)]
struct AcceptanceCriterionDraft {
    given: String,
    when: String,
    then: String,
}

#[derive(Debug, Deserialize, Default)]
struct TaskGeneratorOutput {
    #[serde(default)]
    tasks: Vec<TaskDraft>,
}

pub struct TaskProducer {
    model: Arc<ModelCaller>,
}

impl TaskProducer {
    pub fn new(model: Arc<ModelCaller>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Producer for TaskProducer {
    async fn produce(
        &self,
        trace: &TraceContext,
        slug: &str,
        description: &str,
        previous_findings: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ProducerOutput, ReviewLoopError> {
        let mut prompt = format!(
            "Break the approved phases of plan '{slug}' into concrete tasks.\nPlan description: {description}\nRespond as JSON: {{\"tasks\": [{{\"phase_id\": ..., \"description\": ..., \"type\": \"implement|test|document|review|refactor\", \"acceptance_criteria\": [{{\"given\": ..., \"when\": ..., \"then\": ...}}], \"depends_on\": [...]}}]}}"
        );
        if let Some(findings) = previous_findings {
            prompt.push_str(&format!("\n\nPrevious review findings, revise accordingly:\n{findings}"));
        }

        let request = CompletionRequest::new(
            "planning",
            vec![
                Message::system("You break approved phases into executable tasks. Respond with JSON only."),
                Message::user(prompt),
            ],
        );
        let response = self.model.complete(trace, request, cancel).await?;
        let request_id = response.request_id.clone();

        let gap_result = parse_gaps(&response.content);
        if gap_result.gaps.iter().any(|g| g.urgency == Urgency::Blocking) {
            return Ok(ProducerOutput {
                entity: None,
                request_ids: vec![request_id],
                gaps: gap_result.gaps,
            });
        }

        let parsed: TaskGeneratorOutput = extract_json(&gap_result.cleaned_output)
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| ReviewLoopError::UnparseableOutput {
                kind: "task".to_string(),
                slug: slug.to_string(),
                what: "task generator did not return a {\"tasks\": [...]} JSON array".to_string(),
            })?;

        let tasks = parsed
            .tasks
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                let mut task = Task::new(
                    slug,
                    format!("{slug}-task-{}", i + 1),
                    (i + 1) as u32,
                    draft.phase_id,
                    draft.description,
                    draft.task_type,
                );
                task.acceptance_criteria = draft
                    .acceptance_criteria
                    .into_iter()
                    .map(|c| planloop_types::AcceptanceCriterion::new(c.given, c.when, c.then))
                    .collect();
                task.depends_on = draft.depends_on;
                task
            })
            .collect();

        Ok(ProducerOutput {
            entity: Some(ProducerEntity::Tasks(tasks)),
            request_ids: vec![request_id],
            gaps: gap_result.gaps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_draft_defaults_dependencies_to_empty() {
        let draft: PhaseDraft = serde_json::from_value(serde_json::json!({
            "name": "API layer",
            "description": "wire the endpoint",
        }))
        .unwrap();
        assert!(draft.dependencies.is_empty());
    }

    #[test]
    fn task_draft_defaults_type_to_implement() {
        let draft: TaskDraft = serde_json::from_value(serde_json::json!({
            "phase_id": "p1",
            "description": "wire the cache client",
        }))
        .unwrap();
        assert!(matches!(draft.task_type, TaskType::Implement));
    }
}
