//! Subject name conventions for the review loop engine (spec §4.3.5).
//!
//! Every subject is built from a [`ReviewKind`], never hand-formatted at the
//! call site, so a typo in `"revision_needed"` can't drift between the loop
//! engine and the event router that subscribes to it.

use planloop_types::ReviewKind;

pub const WORKFLOW_STREAM: &str = "WORKFLOW";
pub const USER_SIGNAL_STREAM: &str = "USER_SIGNAL";

pub fn trigger_subject(kind: ReviewKind) -> String {
    format!("workflow.trigger.{}", kind.loop_name())
}

pub fn approved_subject(kind: ReviewKind) -> String {
    format!("workflow.events.{}.approved", kind.as_str())
}

pub fn revision_needed_subject(kind: ReviewKind) -> String {
    format!("workflow.events.{}.revision_needed", kind.as_str())
}

pub fn loop_complete_subject(kind: ReviewKind) -> String {
    format!("workflow.events.{}.loop_complete", kind.as_str())
}

/// Only the task loop publishes this one — execution, not review, is what
/// completes.
pub fn execution_complete_subject() -> String {
    "workflow.events.task.execution_complete".to_string()
}

/// The batch-dispatch trigger for `POST plans/{slug}/execute` (spec §6.1):
/// not a review loop, so it doesn't take a `ReviewKind`, but named the same
/// way so it sits next to `execution_complete_subject` on the bus.
pub fn execution_trigger_subject() -> &'static str {
    "workflow.trigger.task-execution"
}

pub fn result_subject(component: &str, slug: &str) -> String {
    format!("workflow.result.{component}.{slug}")
}

pub fn escalate_subject() -> &'static str {
    "user.signal.escalate"
}

pub fn error_subject() -> &'static str {
    "user.signal.error"
}

/// All subjects a loop-name `ConsumerSpec` should filter on end up here.
pub fn events_wildcard() -> &'static str {
    "workflow.events.>"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_subject_uses_loop_name() {
        assert_eq!(trigger_subject(ReviewKind::Plan), "workflow.trigger.plan-review-loop");
    }

    #[test]
    fn approved_subject_uses_kind_tag() {
        assert_eq!(approved_subject(ReviewKind::Task), "workflow.events.task.approved");
    }

    #[test]
    fn revision_needed_subject_uses_kind_tag() {
        assert_eq!(
            revision_needed_subject(ReviewKind::Phase),
            "workflow.events.phase.revision_needed"
        );
    }

    #[test]
    fn execution_trigger_subject_is_distinct_from_review_triggers() {
        assert_ne!(execution_trigger_subject(), trigger_subject(ReviewKind::Task));
    }
}
