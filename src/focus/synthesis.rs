//! Deterministic fallback when the synthesis LLM call fails or returns
//! something unparseable: concatenate goals/contexts prefixed by focus
//! area, and union the three scope sets with duplicate removal preserving
//! first-seen order.

use planloop_types::Scope;

use super::PlannerOutput;

pub struct MergedPlan {
    pub goal: String,
    pub context: String,
    pub scope: Scope,
}

pub fn simple_merge(outputs: &[PlannerOutput]) -> MergedPlan {
    let goal = outputs
        .iter()
        .map(|o| format!("[{}] {}", o.area, o.goal))
        .collect::<Vec<_>>()
        .join(" ");
    let context = outputs
        .iter()
        .map(|o| format!("[{}] {}", o.area, o.context))
        .collect::<Vec<_>>()
        .join("\n");

    let scope = outputs
        .iter()
        .map(|o| o.scope.clone())
        .reduce(|acc, scope| acc.merge(scope))
        .unwrap_or_default();

    MergedPlan { goal, context, scope }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(area: &str, goal: &str, include: &[&str]) -> PlannerOutput {
        PlannerOutput {
            area: area.to_string(),
            goal: goal.to_string(),
            context: format!("{area} context"),
            scope: Scope {
                include: include.iter().map(|s| s.to_string()).collect(),
                exclude: Vec::new(),
                protected: Vec::new(),
            },
            request_id: format!("{area}-req"),
        }
    }

    #[test]
    fn merges_goals_prefixed_by_area() {
        let outputs = vec![
            output("api", "wire the endpoint", &["api/handler.rs"]),
            output("data", "add the cache table", &["data/schema.sql"]),
        ];
        let merged = simple_merge(&outputs);
        assert!(merged.goal.contains("[api] wire the endpoint"));
        assert!(merged.goal.contains("[data] add the cache table"));
    }

    #[test]
    fn unions_scope_include_preserving_first_seen_order() {
        let outputs = vec![
            output("api", "g1", &["shared.rs", "api.rs"]),
            output("data", "g2", &["shared.rs", "data.rs"]),
        ];
        let merged = simple_merge(&outputs);
        assert_eq!(
            merged.scope.include,
            vec!["shared.rs".to_string(), "api.rs".to_string(), "data.rs".to_string()]
        );
    }

    #[test]
    fn empty_outputs_yields_default_scope() {
        let merged = simple_merge(&[]);
        assert!(merged.scope.include.is_empty());
        assert!(merged.goal.is_empty());
    }
}
