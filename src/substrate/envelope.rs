//! The dual-format parser every consumer runs a raw JetStream message body
//! through: some publishers on the bus send a full `MessageEnvelope`
//! (`{"type": ..., "payload": ..., "trace_id": ...}`), others publish their
//! payload object directly with no envelope wrapper at all. Both must yield
//! a usable payload and, wherever one is present, a preserved `trace_id`.

use planloop_types::{MessageEnvelope, TraceContext};

use crate::errors::SubstrateError;

/// The result of unwrapping a message body, regardless of which format it
/// arrived in.
pub struct ParsedEnvelope {
    pub payload: serde_json::Value,
    pub trace: TraceContext,
    /// `Some` only when the message arrived as a full envelope.
    pub source: Option<String>,
}

/// Parse `bytes` as either a `MessageEnvelope` or a bare payload object.
///
/// A body counts as a wrapped envelope only when it deserializes cleanly
/// into `MessageEnvelope` — a bare payload that happens to have a `payload`
/// key of its own is vanishingly unlikely on this bus and is not specially
/// cased here.
pub fn parse_envelope(subject: &str, bytes: &[u8]) -> Result<ParsedEnvelope, SubstrateError> {
    if let Ok(envelope) = serde_json::from_slice::<MessageEnvelope>(bytes) {
        return Ok(ParsedEnvelope {
            payload: envelope.payload,
            trace: TraceContext {
                trace_id: envelope.trace_id,
                loop_id: envelope.loop_id,
            },
            source: Some(envelope.source),
        });
    }

    let payload: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| SubstrateError::MalformedEnvelope {
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;

    if !payload.is_object() {
        return Err(SubstrateError::MalformedEnvelope {
            subject: subject.to_string(),
            reason: "raw payload is not a JSON object".to_string(),
        });
    }

    Ok(ParsedEnvelope {
        payload,
        trace: TraceContext::new(),
        source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use planloop_types::MessageType;

    #[test]
    fn parses_wrapped_envelope_and_keeps_trace_id() {
        let envelope = MessageEnvelope::new(
            MessageType::new("workflow", "plan", "v1"),
            serde_json::json!({"slug": "add-caching"}),
            "plan-manager",
            "trace-123",
        );
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let parsed = parse_envelope("workflow.trigger.plan-review-loop", &bytes).unwrap();
        assert_eq!(parsed.trace.trace_id, "trace-123");
        assert_eq!(parsed.payload["slug"], "add-caching");
        assert_eq!(parsed.source.as_deref(), Some("plan-manager"));
    }

    #[test]
    fn parses_raw_payload_with_fresh_trace_id() {
        let bytes = serde_json::to_vec(&serde_json::json!({"slug": "add-caching"})).unwrap();
        let parsed = parse_envelope("workflow.trigger.plan-review-loop", &bytes).unwrap();
        assert!(!parsed.trace.trace_id.is_empty());
        assert_eq!(parsed.payload["slug"], "add-caching");
        assert!(parsed.source.is_none());
    }

    #[test]
    fn rejects_non_object_payload() {
        let bytes = serde_json::to_vec(&serde_json::json!([1, 2, 3])).unwrap();
        let err = parse_envelope("workflow.trigger.plan-review-loop", &bytes).unwrap_err();
        assert!(matches!(err, SubstrateError::MalformedEnvelope { .. }));
    }

    #[test]
    fn rejects_garbage_bytes() {
        let err = parse_envelope("workflow.trigger.plan-review-loop", b"not json").unwrap_err();
        assert!(matches!(err, SubstrateError::MalformedEnvelope { .. }));
    }
}
