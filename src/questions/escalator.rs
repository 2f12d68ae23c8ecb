//! SLA monitor and escalator for pending questions. A gap blocks its owning
//! loop indefinitely, so something has to notice when a blocking question
//! has sat unanswered too long and raise it to a human — this is that
//! something, not the review loop engine itself.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::warn;

use super::store::QuestionStore;
use crate::errors::QuestionError;
use crate::substrate::Substrate;

/// Matches the review loop's default iteration budget in spirit, not value:
/// an hour is long enough that a human has had a fair chance to notice the
/// question before the escalator starts paging about it.
pub const DEFAULT_SLA: Duration = Duration::from_secs(60 * 60);

pub fn overdue_subject() -> &'static str {
    "user.signal.question.overdue"
}

pub struct QuestionEscalator {
    substrate: Arc<Substrate>,
    store: Arc<QuestionStore>,
    sla: Duration,
}

impl QuestionEscalator {
    pub fn new(substrate: Arc<Substrate>, store: Arc<QuestionStore>) -> Self {
        Self { substrate, store, sla: DEFAULT_SLA }
    }

    pub fn with_sla(mut self, sla: Duration) -> Self {
        self.sla = sla;
        self
    }

    /// One sweep: find every pending question past its SLA and publish a
    /// best-effort overdue signal for each. Returns how many were escalated.
    pub async fn sweep(&self) -> Result<usize, QuestionError> {
        let overdue = self.store.sweep_overdue(self.sla).await?;
        for question in &overdue {
            if !question.is_blocking() {
                continue;
            }
            warn!(question_id = %question.id, topic = %question.topic, "question overdue, escalating");
            self.substrate
                .publish_best_effort(
                    overdue_subject(),
                    &json!({
                        "question_id": question.id,
                        "trace_id": question.trace_id,
                        "slug": question.slug,
                        "topic": question.topic,
                        "text": question.text,
                        "created_at": question.created_at,
                    }),
                )
                .await;
        }
        Ok(overdue.iter().filter(|q| q.is_blocking()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overdue_subject_is_a_user_signal() {
        assert!(overdue_subject().starts_with("user.signal."));
    }
}
