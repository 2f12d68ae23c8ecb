//! Question store (spec §6.3): `QUESTIONS` holds each question keyed by its
//! id; `CONTEXT_RESPONSES` archives the raw answer event payload keyed
//! `{trace_id}.{question_id}`, independent of the mutated `Question.answer`
//! field — the same split `MODEL_AUDIT` keeps from working loop state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use planloop_types::{Gap, Question};
use serde_json::Value;

use crate::errors::{QuestionError, SubstrateError};
use crate::substrate::{BucketKv, BucketSpec, KvBackend, Substrate};

const QUESTIONS_BUCKET: &str = "QUESTIONS";
const CONTEXT_RESPONSES_BUCKET: &str = "CONTEXT_RESPONSES";
const ANSWER_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub struct QuestionStore {
    questions: Arc<dyn KvBackend>,
    responses: Arc<dyn KvBackend>,
}

impl QuestionStore {
    pub fn new(substrate: Arc<Substrate>) -> Self {
        Self {
            questions: Arc::new(BucketKv::new(substrate.clone(), BucketSpec::new(QUESTIONS_BUCKET))),
            responses: Arc::new(BucketKv::new(
                substrate,
                BucketSpec::new(CONTEXT_RESPONSES_BUCKET).with_ttl(ANSWER_TTL),
            )),
        }
    }

    pub fn with_backends(questions: Arc<dyn KvBackend>, responses: Arc<dyn KvBackend>) -> Self {
        Self { questions, responses }
    }

    pub async fn create(
        &self,
        id: impl Into<String>,
        trace_id: impl Into<String>,
        slug: Option<String>,
        topic: impl Into<String>,
        gap: &Gap,
    ) -> Result<Question, QuestionError> {
        let question = Question::new(id, trace_id, slug, topic, gap);
        self.save(&question).await?;
        Ok(question)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Question>, QuestionError> {
        match self.questions.get(id).await.map_err(SubstrateError::from)? {
            Some(bytes) => {
                let question = serde_json::from_slice(&bytes)
                    .map_err(|e| SubstrateError::MalformedEnvelope { subject: id.to_string(), reason: e.to_string() })?;
                Ok(Some(question))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, question: &Question) -> Result<(), QuestionError> {
        let bytes = serde_json::to_vec(question)
            .map_err(|e| SubstrateError::MalformedEnvelope { subject: question.id.clone(), reason: e.to_string() })?;
        self.questions.put(&question.id, bytes).await.map_err(SubstrateError::from)?;
        Ok(())
    }

    /// Record an answer: archives the raw event payload in
    /// `CONTEXT_RESPONSES`, then transitions the question to `Answered`.
    pub async fn answer(&self, id: &str, answer: impl Into<String>, raw_payload: &Value) -> Result<Question, QuestionError> {
        let mut question = self.get(id).await?.ok_or_else(|| QuestionError::NotFound { id: id.to_string() })?;
        if !question.is_pending() {
            return Err(QuestionError::AlreadyAnswered { id: id.to_string() });
        }
        let response_key = format!("{}.{}", question.trace_id, question.id);
        let bytes = serde_json::to_vec(raw_payload)
            .map_err(|e| SubstrateError::MalformedEnvelope { subject: response_key.clone(), reason: e.to_string() })?;
        self.responses.put(&response_key, bytes).await.map_err(SubstrateError::from)?;

        question.answer(answer);
        self.save(&question).await?;
        Ok(question)
    }

    /// Whether `slug` has a pending blocking question still open — the
    /// review loop engine checks this at the top of every trigger to stay
    /// paused until the question is answered.
    pub async fn has_pending_blocking_for_slug(&self, slug: &str) -> Result<bool, QuestionError> {
        let keys = self.questions.keys().await.map_err(SubstrateError::from)?;
        for key in keys {
            if let Some(question) = self.get(&key).await? {
                if question.is_pending() && question.is_blocking() && question.slug.as_deref() == Some(slug) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// All pending questions older than `max_age` — fed to the escalator
    /// (spec §8 scenario 4: a blocking gap pauses the workflow until
    /// answered; this is what detects "until" has run out).
    pub async fn sweep_overdue(&self, max_age: Duration) -> Result<Vec<Question>, QuestionError> {
        let keys = self.questions.keys().await.map_err(SubstrateError::from)?;
        let now = Utc::now();
        let mut overdue = Vec::new();
        for key in keys {
            if let Some(question) = self.get(&key).await? {
                if question.is_pending() && (now - question.created_at).to_std().unwrap_or_default() >= max_age {
                    overdue.push(question);
                }
            }
        }
        Ok(overdue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::MemoryKv;
    use planloop_types::Urgency;
    use serde_json::json;

    fn store() -> QuestionStore {
        QuestionStore::with_backends(Arc::new(MemoryKv::default()), Arc::new(MemoryKv::default()))
    }

    fn gap() -> Gap {
        Gap { question: "Which database?".to_string(), urgency: Urgency::Blocking }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = store();
        let created = store.create("q1", "trace-1", Some("add-caching".to_string()), "plan.gap.scope", &gap()).await.unwrap();
        let fetched = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.text, "Which database?");
        assert!(fetched.is_pending());
    }

    #[tokio::test]
    async fn answering_archives_raw_payload_and_transitions_status() {
        let store = store();
        store.create("q1", "trace-1", None, "plan.gap.scope", &gap()).await.unwrap();
        let answered = store.answer("q1", "Postgres", &json!({"answer": "Postgres"})).await.unwrap();
        assert!(!answered.is_pending());
        assert_eq!(answered.answer.as_deref(), Some("Postgres"));
    }

    #[tokio::test]
    async fn answering_twice_is_rejected() {
        let store = store();
        store.create("q1", "trace-1", None, "plan.gap.scope", &gap()).await.unwrap();
        store.answer("q1", "Postgres", &json!({})).await.unwrap();
        let result = store.answer("q1", "MySQL", &json!({})).await;
        assert!(matches!(result, Err(QuestionError::AlreadyAnswered { .. })));
    }

    #[tokio::test]
    async fn answering_missing_question_is_not_found() {
        let store = store();
        let result = store.answer("missing", "x", &json!({})).await;
        assert!(matches!(result, Err(QuestionError::NotFound { .. })));
    }

    #[tokio::test]
    async fn has_pending_blocking_for_slug_is_true_while_unanswered() {
        let store = store();
        store.create("q1", "trace-1", Some("add-caching".to_string()), "plan.gap.scope", &gap()).await.unwrap();
        assert!(store.has_pending_blocking_for_slug("add-caching").await.unwrap());
        assert!(!store.has_pending_blocking_for_slug("other-slug").await.unwrap());
    }

    #[tokio::test]
    async fn has_pending_blocking_for_slug_is_false_once_answered() {
        let store = store();
        store.create("q1", "trace-1", Some("add-caching".to_string()), "plan.gap.scope", &gap()).await.unwrap();
        store.answer("q1", "Postgres", &json!({})).await.unwrap();
        assert!(!store.has_pending_blocking_for_slug("add-caching").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_overdue_returns_only_pending_past_max_age() {
        let store = store();
        store.create("q1", "trace-1", None, "plan.gap.scope", &gap()).await.unwrap();
        store.create("q2", "trace-1", None, "plan.gap.scope", &gap()).await.unwrap();
        store.answer("q2", "done", &json!({})).await.unwrap();
        let overdue = store.sweep_overdue(Duration::from_secs(0)).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, "q1");
    }
}
