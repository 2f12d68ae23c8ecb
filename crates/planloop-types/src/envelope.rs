//! The message envelope every processor publishes and consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{domain, category, version}` — e.g. `{"workflow", "plan", "v1"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageType {
    pub domain: String,
    pub category: String,
    pub version: String,
}

impl MessageType {
    pub fn new(domain: impl Into<String>, category: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            category: category.into(),
            version: version.into(),
        }
    }
}

/// `{type, payload, source, trace_id, created_at}` (spec §6.2).
///
/// `payload` is kept as a raw `serde_json::Value` here rather than generic
/// over `T`: the dual-format consumer in the review loop engine needs to
/// inspect the envelope's shape before it knows which concrete payload type
/// to deserialize into, and a generic envelope would force that decision
/// too early.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payload: serde_json::Value,
    pub source: String,
    pub trace_id: String,
    #[serde(default)]
    pub loop_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageEnvelope {
    pub fn new(
        message_type: MessageType,
        payload: serde_json::Value,
        source: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            message_type,
            payload,
            source: source.into(),
            trace_id: trace_id.into(),
            loop_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_loop_id(mut self, loop_id: impl Into<String>) -> Self {
        self.loop_id = Some(loop_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let env = MessageEnvelope::new(
            MessageType::new("workflow", "plan", "v1"),
            serde_json::json!({"slug": "add-caching"}),
            "review-loop-engine",
            "trace-1",
        );
        let json = serde_json::to_string(&env).unwrap();
        let parsed: MessageEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.trace_id, "trace-1");
        assert_eq!(parsed.payload["slug"], "add-caching");
    }
}
