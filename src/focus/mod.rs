//! Focus coordinator: fans a planning trigger out across one or more
//! "focus areas" (API layer, data layer, ...), runs one planner LLM call per
//! focus concurrently, then synthesizes the results into a single plan.
//!
//! Concurrency shape mirrors a wave of spawned workers reporting back over
//! bounded channels: a results channel, an errors channel, and a
//! cancellation signal, so a worker whose receiver has already gone away
//! (timeout or cancel) never blocks trying to send.

mod session;
mod synthesis;

pub use session::{FocusSession, FocusState, SessionMap};
pub use synthesis::simple_merge;

use std::sync::Arc;
use std::time::Duration;

use planloop_types::{Scope, TraceContext};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::errors::FocusError;
use crate::model::{extract_json, CompletionRequest, Message, ModelCaller};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusArea {
    pub area: String,
    pub description: String,
    #[serde(default)]
    pub hints: Vec<String>,
}

/// What triggers a coordination run: either the caller already knows which
/// focuses it wants, or the coordinator must derive them itself.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub plan_slug: String,
    pub description: String,
    pub explicit_focuses: Vec<FocusArea>,
    pub max_planners: Option<usize>,
    pub graph_context: Option<String>,
}

impl Trigger {
    pub fn new(plan_slug: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            plan_slug: plan_slug.into(),
            description: description.into(),
            explicit_focuses: Vec::new(),
            max_planners: None,
            graph_context: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannerOutput {
    pub area: String,
    pub goal: String,
    pub context: String,
    pub scope: Scope,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct SynthesizedPlan {
    pub goal: String,
    pub context: String,
    pub scope: Scope,
    /// Focus areas that actually ran and contributed a result.
    pub contributing_focuses: Vec<String>,
    /// Every model request id spent producing this plan (focus selection,
    /// each planner, and synthesis if it ran) — folded into the review
    /// loop's `IterationCalls` entry by the caller.
    pub request_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FocusSelectionOutput {
    #[serde(default)]
    focus_areas: Vec<FocusArea>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlannerParseOutput {
    #[serde(default)]
    goal: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    scope: ScopeOutput,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ScopeOutput {
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    protected: Vec<String>,
}

impl From<ScopeOutput> for Scope {
    fn from(s: ScopeOutput) -> Self {
        Scope {
            include: s.include,
            exclude: s.exclude,
            protected: s.protected,
        }
    }
}

pub struct FocusCoordinatorConfig {
    pub max_concurrent_planners: usize,
    pub planner_timeout: Duration,
}

impl Default for FocusCoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_planners: 3,
            planner_timeout: Duration::from_secs(120),
        }
    }
}

pub struct FocusCoordinator {
    model: Arc<ModelCaller>,
    config: FocusCoordinatorConfig,
    sessions: SessionMap,
}

impl FocusCoordinator {
    pub fn new(model: Arc<ModelCaller>, config: FocusCoordinatorConfig) -> Self {
        Self {
            model,
            config,
            sessions: SessionMap::new(),
        }
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    #[instrument(skip(self, trigger, cancel), fields(plan_slug = %trigger.plan_slug))]
    pub async fn coordinate(
        &self,
        trace: &TraceContext,
        trigger: Trigger,
        cancel: &CancellationToken,
    ) -> Result<SynthesizedPlan, FocusError> {
        let (focuses, mut request_ids) = self.resolve_focuses(trace, &trigger, cancel).await;
        let focuses = cap_focuses(focuses, trigger.max_planners, self.config.max_concurrent_planners);

        let outputs = self.fan_out(trace, &trigger, &focuses, cancel).await?;

        if outputs.is_empty() {
            return Err(FocusError::SynthesisFailed {
                plan_slug: trigger.plan_slug.clone(),
                reason: "all focus workers failed".to_string(),
            });
        }

        request_ids.extend(outputs.iter().map(|o| o.request_id.clone()));
        self.synthesize(trace, &trigger, outputs, request_ids, cancel).await
    }

    /// Returns the resolved focuses plus the request id of the
    /// focus-selection call, if one was made (explicit focuses skip it).
    async fn resolve_focuses(
        &self,
        trace: &TraceContext,
        trigger: &Trigger,
        cancel: &CancellationToken,
    ) -> (Vec<FocusArea>, Vec<String>) {
        if !trigger.explicit_focuses.is_empty() {
            return (trigger.explicit_focuses.clone(), Vec::new());
        }

        let mut prompt = format!(
            "Identify the focus areas needed to plan: {}\nRespond as JSON: {{\"focus_areas\": [{{\"area\": ..., \"description\": ..., \"hints\": [...]}}]}}",
            trigger.description
        );
        if let Some(graph_context) = &trigger.graph_context {
            prompt.push_str(&format!("\n\nGraph context:\n{graph_context}"));
        }

        let request = CompletionRequest::new(
            "planning",
            vec![
                Message::system("You select focus areas for a multi-planner fan-out. Respond with JSON only."),
                Message::user(prompt),
            ],
        );

        match self.model.complete(trace, request, cancel).await {
            Ok(response) => {
                let request_ids = vec![response.request_id.clone()];
                match extract_json(&response.content)
                    .and_then(|v| serde_json::from_value::<FocusSelectionOutput>(v).ok())
                {
                    Some(parsed) if !parsed.focus_areas.is_empty() => (parsed.focus_areas, request_ids),
                    _ => {
                        warn!("focus-selection response was unparseable, falling back to a single general focus");
                        (vec![default_focus()], request_ids)
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "focus-selection call failed, falling back to a single general focus");
                (vec![default_focus()], Vec::new())
            }
        }
    }

    async fn fan_out(
        &self,
        trace: &TraceContext,
        trigger: &Trigger,
        focuses: &[FocusArea],
        cancel: &CancellationToken,
    ) -> Result<Vec<PlannerOutput>, FocusError> {
        let (result_tx, mut result_rx) = mpsc::channel::<PlannerOutput>(focuses.len().max(1));
        let (error_tx, mut error_rx) = mpsc::channel::<FocusError>(focuses.len().max(1));

        for focus in focuses {
            self.sessions
                .set(&trigger.plan_slug, &focus.area, FocusState::Pending)
                .await;
        }

        let mut handles = Vec::with_capacity(focuses.len());
        for focus in focuses.iter().cloned() {
            let model = Arc::clone(&self.model);
            let trace = trace.clone();
            let trigger_description = trigger.description.clone();
            let plan_slug = trigger.plan_slug.clone();
            let sessions = self.sessions.clone();
            let result_tx = result_tx.clone();
            let error_tx = error_tx.clone();
            let worker_cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                sessions.set(&plan_slug, &focus.area, FocusState::Running).await;

                let outcome = run_planner(&model, &trace, &plan_slug, &focus, &trigger_description, &worker_cancel).await;

                match outcome {
                    Ok(output) => {
                        sessions
                            .set(&plan_slug, &focus.area, FocusState::Completed)
                            .await;
                        tokio::select! {
                            _ = result_tx.send(output) => {}
                            _ = worker_cancel.cancelled() => {}
                        }
                    }
                    Err(err) => {
                        sessions.set(&plan_slug, &focus.area, FocusState::Failed).await;
                        tokio::select! {
                            _ = error_tx.send(err) => {}
                            _ = worker_cancel.cancelled() => {}
                        }
                    }
                }
            });
            handles.push(handle);
        }
        drop(result_tx);
        drop(error_tx);

        let per_focus_timeout = self.config.planner_timeout * (focuses.len().max(1) as u32);
        let mut outputs = Vec::new();
        let mut errors = Vec::new();

        let collect = async {
            loop {
                tokio::select! {
                    Some(output) = result_rx.recv() => outputs.push(output),
                    Some(err) = error_rx.recv() => errors.push(err),
                    else => break,
                }
            }
        };

        tokio::select! {
            _ = collect => {}
            _ = tokio::time::sleep(per_focus_timeout) => {
                warn!("focus fan-out timed out waiting for workers");
            }
            _ = cancel.cancelled() => {}
        }

        for handle in handles {
            handle.abort();
        }

        if outputs.is_empty() && !errors.is_empty() {
            warn!(count = errors.len(), "all focus workers failed");
        }

        Ok(outputs)
    }

    async fn synthesize(
        &self,
        trace: &TraceContext,
        trigger: &Trigger,
        mut outputs: Vec<PlannerOutput>,
        request_ids: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<SynthesizedPlan, FocusError> {
        let contributing_focuses = outputs.iter().map(|o| o.area.clone()).collect();

        if outputs.len() == 1 {
            let only = outputs.remove(0);
            return Ok(SynthesizedPlan {
                goal: only.goal,
                context: only.context,
                scope: only.scope,
                contributing_focuses,
                request_ids,
            });
        }

        let listing = outputs
            .iter()
            .map(|o| format!("[{}]\ngoal: {}\ncontext: {}", o.area, o.goal, o.context))
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = CompletionRequest::new(
            "planning",
            vec![
                Message::system("You synthesize multiple planner outputs into one coherent plan. Respond with JSON only: {\"goal\": ..., \"context\": ..., \"scope\": {\"include\": [...], \"exclude\": [...], \"protected\": [...]}}"),
                Message::user(listing),
            ],
        );

        let mut request_ids = request_ids;
        let synthesized = match self.model.complete(trace, request, cancel).await {
            Ok(response) => {
                request_ids.push(response.request_id.clone());
                extract_json(&response.content)
                    .and_then(|v| serde_json::from_value::<PlannerParseOutput>(v).ok())
                    .filter(|parsed| !parsed.goal.trim().is_empty())
            }
            Err(err) => {
                warn!(error = %err, "synthesis call failed, falling back to simple merge");
                None
            }
        };

        let plan = match synthesized {
            Some(parsed) => SynthesizedPlan {
                goal: parsed.goal,
                context: parsed.context,
                scope: parsed.scope.into(),
                contributing_focuses,
                request_ids,
            },
            None => {
                let merged = simple_merge(&outputs);
                SynthesizedPlan {
                    goal: merged.goal,
                    context: merged.context,
                    scope: merged.scope,
                    contributing_focuses,
                    request_ids,
                }
            }
        };

        let _ = &trigger.plan_slug;
        Ok(plan)
    }
}

fn default_focus() -> FocusArea {
    FocusArea {
        area: "general".to_string(),
        description: "Plan the change as a single undifferentiated focus.".to_string(),
        hints: Vec::new(),
    }
}

fn cap_focuses(mut focuses: Vec<FocusArea>, max_planners: Option<usize>, config_max: usize) -> Vec<FocusArea> {
    let cap = [max_planners, Some(config_max), Some(focuses.len())]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(0);
    focuses.truncate(cap);
    focuses
}

async fn run_planner(
    model: &ModelCaller,
    trace: &TraceContext,
    plan_slug: &str,
    focus: &FocusArea,
    description: &str,
    cancel: &CancellationToken,
) -> Result<PlannerOutput, FocusError> {
    let prompt = format!(
        "Plan '{plan_slug}' is focused on area '{}': {}\nOverall description: {description}\nHints: {:?}\nRespond as JSON: {{\"goal\": ..., \"context\": ..., \"scope\": {{\"include\": [...], \"exclude\": [...], \"protected\": [...]}}}}",
        focus.area, focus.description, focus.hints
    );

    let request = CompletionRequest::new(
        "planning",
        vec![
            Message::system("You are a focused planner for one area of a larger change. Respond with JSON only."),
            Message::user(prompt),
        ],
    );

    let response = model.complete(trace, request, cancel).await?;

    let parsed: PlannerParseOutput = extract_json(&response.content)
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| FocusError::SynthesisFailed {
            plan_slug: plan_slug.to_string(),
            reason: format!("planner for focus '{}' returned unparseable JSON", focus.area),
        })?;

    Ok(PlannerOutput {
        area: focus.area.clone(),
        goal: parsed.goal,
        context: parsed.context,
        scope: parsed.scope.into(),
        request_id: response.request_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_focuses_takes_the_minimum_of_all_three() {
        let focuses = vec![
            FocusArea { area: "a".into(), description: String::new(), hints: vec![] },
            FocusArea { area: "b".into(), description: String::new(), hints: vec![] },
            FocusArea { area: "c".into(), description: String::new(), hints: vec![] },
        ];
        let capped = cap_focuses(focuses, Some(5), 2);
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn cap_focuses_respects_trigger_max_below_config_max() {
        let focuses = vec![
            FocusArea { area: "a".into(), description: String::new(), hints: vec![] },
            FocusArea { area: "b".into(), description: String::new(), hints: vec![] },
        ];
        let capped = cap_focuses(focuses, Some(1), 3);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn cap_focuses_with_no_max_planners_uses_config_max() {
        let focuses = vec![
            FocusArea { area: "a".into(), description: String::new(), hints: vec![] },
            FocusArea { area: "b".into(), description: String::new(), hints: vec![] },
            FocusArea { area: "c".into(), description: String::new(), hints: vec![] },
            FocusArea { area: "d".into(), description: String::new(), hints: vec![] },
        ];
        let capped = cap_focuses(focuses, None, 3);
        assert_eq!(capped.len(), 3);
    }
}
