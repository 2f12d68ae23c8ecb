//! Sentinel errors shared between the plan manager and its callers.
//!
//! These are matched on by name throughout the event router and HTTP
//! surface (e.g. `AlreadyApproved` is treated as success, `PlanNotFound`
//! becomes a 404), so they live alongside the domain types rather than
//! inside the manager implementation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanManagerError {
    #[error("plan {slug} not found")]
    PlanNotFound { slug: String },

    #[error("plan {slug} is already approved")]
    AlreadyApproved { slug: String },

    #[error("plan {slug} cannot transition from {from} to {to}")]
    InvalidTransition {
        slug: String,
        from: String,
        to: String,
    },

    #[error("plan {slug} tasks are already approved")]
    TasksAlreadyApproved { slug: String },

    #[error("phase {phase_id} not found on plan {slug}")]
    PhaseNotFound { slug: String, phase_id: String },

    #[error("phase {phase_id} on plan {slug} is not in a state valid for this operation")]
    PhaseInvalidStatus { slug: String, phase_id: String },

    #[error("task {task_id} not found on plan {slug}")]
    TaskNotFound { slug: String, task_id: String },

    #[error("task {task_id} on plan {slug} is not pending approval")]
    TaskNotPendingApproval { slug: String, task_id: String },

    #[error("plan {slug} is not updatable in its current status")]
    PlanNotUpdatable { slug: String },

    #[error("plan {slug} is not deletable in its current status")]
    PlanNotDeletable { slug: String },

    #[error("filesystem error for plan {slug}: {source}")]
    Io {
        slug: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed plan document for {slug}: {source}")]
    Corrupt {
        slug: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PlanManagerError {
    /// Whether a redelivered message that produced this error should be
    /// retried (NAK'd) or given up on (Term'd). Filesystem "not found" and
    /// invalid-input errors are never going to succeed on redelivery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_not_retryable() {
        let err = PlanManagerError::PlanNotFound {
            slug: "x".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn io_error_is_retryable() {
        let err = PlanManagerError::Io {
            slug: "x".into(),
            source: std::io::Error::other("disk full"),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn display_includes_slug() {
        let err = PlanManagerError::AlreadyApproved { slug: "add-caching".into() };
        assert!(err.to_string().contains("add-caching"));
    }
}
