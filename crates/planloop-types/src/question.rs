//! Gaps and questions raised mid-generation: when a planner/producer
//! encounters something it cannot decide on its own, it emits a `<gap>`
//! block instead of guessing. The gap parser turns those blocks into
//! [`Gap`] records; the question subsystem turns each gap into a persisted
//! [`Question`] that pauses the owning loop until answered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How badly a gap blocks forward progress. `Blocking` pauses the loop that
/// raised it; `Advisory` is recorded but does not stop generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Blocking,
    Advisory,
}

impl Urgency {
    /// Unrecognized or missing `<urgency>` content defaults to blocking —
    /// a gap the parser can't classify is treated as the safer case.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "advisory" => Self::Advisory,
            _ => Self::Blocking,
        }
    }
}

/// One `<gap><question>...</question><urgency>...</urgency></gap>` block
/// extracted from a planner/producer's raw output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub question: String,
    pub urgency: Urgency,
}

/// Whether a question has been answered yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Pending,
    Answered,
}

/// A persisted question raised by a gap, tracked in the `QUESTIONS` bucket
/// until answered or its SLA expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub trace_id: String,
    /// Plan slug this question is scoped to, when raised from inside a
    /// review loop trigger. `None` for questions raised outside plan context.
    pub slug: Option<String>,
    /// Dot-separated topic this question was filed under, e.g.
    /// `"plan.gap.scope"` — matched against router patterns for fan-out.
    pub topic: String,
    pub text: String,
    pub urgency: Urgency,
    pub status: QuestionStatus,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub answer: Option<String>,
}

impl Question {
    pub fn new(
        id: impl Into<String>,
        trace_id: impl Into<String>,
        slug: Option<String>,
        topic: impl Into<String>,
        gap: &Gap,
    ) -> Self {
        Self {
            id: id.into(),
            trace_id: trace_id.into(),
            slug,
            topic: topic.into(),
            text: gap.question.clone(),
            urgency: gap.urgency,
            status: QuestionStatus::Pending,
            created_at: Utc::now(),
            answered_at: None,
            answer: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, QuestionStatus::Pending)
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self.urgency, Urgency::Blocking)
    }

    pub fn answer(&mut self, answer: impl Into<String>) {
        self.answer = Some(answer.into());
        self.status = QuestionStatus::Answered;
        self.answered_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_defaults_unknown_text_to_blocking() {
        assert_eq!(Urgency::parse("urgent"), Urgency::Blocking);
        assert_eq!(Urgency::parse(""), Urgency::Blocking);
    }

    #[test]
    fn urgency_parses_advisory_case_insensitively() {
        assert_eq!(Urgency::parse("  Advisory "), Urgency::Advisory);
    }

    #[test]
    fn new_question_starts_pending_with_no_answer() {
        let gap = Gap {
            question: "Which database?".to_string(),
            urgency: Urgency::Blocking,
        };
        let question = Question::new("q1", "trace-1", Some("add-caching".to_string()), "plan.gap.scope", &gap);
        assert!(question.is_pending());
        assert!(question.is_blocking());
        assert!(question.answer.is_none());
    }

    #[test]
    fn answering_transitions_status_and_records_timestamp() {
        let gap = Gap {
            question: "Which database?".to_string(),
            urgency: Urgency::Advisory,
        };
        let mut question = Question::new("q1", "trace-1", None, "plan.gap.scope", &gap);
        question.answer("Postgres");
        assert!(!question.is_pending());
        assert_eq!(question.answer.as_deref(), Some("Postgres"));
        assert!(question.answered_at.is_some());
    }
}
