//! Correlation identifiers propagated through every hop of a request.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `{trace_id, loop_id}` — the trace id is shared by every message produced
/// from one user request; the loop id is scoped to one review-loop
/// execution. Both are plain UUIDs rendered as strings on the wire so they
/// round-trip through JSON and NATS subjects without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    #[serde(default)]
    pub loop_id: Option<String>,
}

impl TraceContext {
    /// Start a new trace at an HTTP boundary or workflow entry point.
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            loop_id: None,
        }
    }

    /// Derive a child context scoped to one review-loop execution, keeping
    /// the parent trace id.
    pub fn with_loop(&self, loop_id: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            loop_id: Some(loop_id.into()),
        }
    }

    /// A fresh loop id, conventionally `{slug}-{kind}-{n}`.
    pub fn new_loop_id(slug: &str, kind: &str) -> String {
        format!("{slug}-{kind}-{}", Uuid::new_v4())
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_trace_has_no_loop_id() {
        let ctx = TraceContext::new();
        assert!(ctx.loop_id.is_none());
        assert!(!ctx.trace_id.is_empty());
    }

    #[test]
    fn with_loop_keeps_parent_trace_id() {
        let ctx = TraceContext::new();
        let child = ctx.with_loop("loop-1");
        assert_eq!(child.trace_id, ctx.trace_id);
        assert_eq!(child.loop_id.as_deref(), Some("loop-1"));
    }
}
