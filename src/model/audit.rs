//! Every model call is recorded to the `MODEL_AUDIT` KV bucket, TTL 7 days,
//! keyed by request id — regardless of whether the call succeeds, times
//! out, errors, or is cancelled.

use std::time::Duration;

use chrono::{DateTime, Utc};
use planloop_types::TraceContext;
use serde::{Deserialize, Serialize};

use crate::substrate::{BucketSpec, Substrate};

const BUCKET: &str = "MODEL_AUDIT";
const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Started,
    Succeeded,
    Failed,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub request_id: String,
    pub trace_id: String,
    pub loop_id: Option<String>,
    pub capability: String,
    pub prompt_hash: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: CallStatus,
    pub tokens_used: u32,
}

impl CallRecord {
    pub fn started(
        request_id: String,
        trace: TraceContext,
        capability: String,
        prompt_hash: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            trace_id: trace.trace_id,
            loop_id: trace.loop_id,
            capability,
            prompt_hash,
            started_at,
            finished_at: None,
            status: CallStatus::Started,
            tokens_used: 0,
        }
    }

    pub fn finish(&mut self, status: CallStatus, tokens_used: u32, finished_at: DateTime<Utc>) {
        self.status = status;
        self.tokens_used = tokens_used;
        self.finished_at = Some(finished_at);
    }
}

pub async fn write(substrate: &Substrate, record: &CallRecord) -> anyhow::Result<()> {
    let bucket = substrate
        .bucket(&BucketSpec::new(BUCKET).with_ttl(DEFAULT_TTL))
        .await?;
    let bytes = serde_json::to_vec(record)?;
    bucket.put(&record.request_id, bytes.into()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_sets_terminal_fields() {
        let mut record = CallRecord::started(
            "req-1".into(),
            TraceContext::new(),
            "planning".into(),
            "hash".into(),
            Utc::now(),
        );
        assert_eq!(record.status, CallStatus::Started);
        record.finish(CallStatus::Succeeded, 128, Utc::now());
        assert_eq!(record.status, CallStatus::Succeeded);
        assert_eq!(record.tokens_used, 128);
        assert!(record.finished_at.is_some());
    }
}
