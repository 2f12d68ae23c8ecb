//! The graph ingester (spec §1/§2): an external collaborator specified only
//! at the level of its inbound message contract. It subscribes to every
//! `workflow.result.>` entity publication the review loop engine and event
//! router best-effort-fan-out to, and mirrors the latest entity per
//! `(component, slug)` into a KV bucket. It is a secondary index, never
//! authoritative — a message it can't parse is logged and dropped, not
//! retried, and a KV write failure never NAKs the message back onto the
//! stream.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::stream::Stream as JsStream;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::errors::SubstrateError;
use crate::substrate::{ack, parse_envelope, BucketKv, BucketSpec, ConsumerSpec, KvBackend, Substrate};

const BUCKET: &str = "GRAPH_ENTITIES";
const CONSUMER: &str = "graph-ingester";
const FETCH_WAIT: Duration = Duration::from_secs(5);
const FETCH_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// One ingested entity, keyed by `(component, slug)`. `component` is
/// whatever the publisher named it (`plan-entity`, `plan-producer`,
/// `phase-producer`, `task-producer`, the legacy `plan` promote result) —
/// the ingester doesn't interpret it, just files it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEntity {
    pub component: String,
    pub slug: String,
    pub trace_id: String,
    pub payload: serde_json::Value,
    pub ingested_at: DateTime<Utc>,
}

impl GraphEntity {
    pub fn key(&self) -> String {
        entity_key(&self.component, &self.slug)
    }
}

fn entity_key(component: &str, slug: &str) -> String {
    format!("{component}.{slug}")
}

/// Split a `workflow.result.<component>.<slug>` subject into its two
/// variable segments. Anything else on the bus isn't one of ours.
fn parse_result_subject(subject: &str) -> Option<(&str, &str)> {
    let mut parts = subject.splitn(4, '.');
    let workflow = parts.next()?;
    let result = parts.next()?;
    let component = parts.next()?;
    let slug = parts.next()?;
    if workflow == "workflow" && result == "result" && !slug.is_empty() {
        Some((component, slug))
    } else {
        None
    }
}

pub struct GraphIngester {
    kv: Arc<dyn KvBackend>,
    consumer: PullConsumer,
}

impl GraphIngester {
    pub async fn new(substrate: Arc<Substrate>, workflow_stream: &JsStream) -> Result<Self, SubstrateError> {
        let spec = ConsumerSpec::new(CONSUMER, "workflow.result.>").with_deliver_new();
        let consumer = substrate.consumer(workflow_stream, &spec).await?;
        let kv = Arc::new(BucketKv::new(substrate, BucketSpec::new(BUCKET)));
        Ok(Self { kv, consumer })
    }

    pub async fn get(&self, component: &str, slug: &str) -> Result<Option<GraphEntity>, SubstrateError> {
        let bytes = self
            .kv
            .get(&entity_key(component, slug))
            .await
            .map_err(SubstrateError::Other)?;
        match bytes {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| SubstrateError::Other(anyhow::Error::from(e))),
            None => Ok(None),
        }
    }

    /// Drive the `workflow.result.>` fetch loop until `cancel` fires.
    pub async fn run(&self, cancel: &tokio_util::sync::CancellationToken) -> Result<(), SubstrateError> {
        while !cancel.is_cancelled() {
            let batch = match Substrate::fetch_batch(&self.consumer, 1, FETCH_WAIT).await {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(error = %err, "workflow.result fetch failed, retrying");
                    tokio::time::sleep(FETCH_RETRY_BACKOFF).await;
                    continue;
                }
            };
            for message in batch {
                self.ingest(&message).await;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, message), fields(subject = %message.subject))]
    async fn ingest(&self, message: &async_nats::jetstream::Message) {
        let subject = message.subject.to_string();
        // Best-effort, spec §9: a dropped graph update never causes
        // redelivery, since redelivery can't fix a malformed entity either.
        ack(message).await;

        let Some((component, slug)) = parse_result_subject(&subject) else {
            warn!(%subject, "not a workflow.result.<component>.<slug> subject, ignored");
            return;
        };

        let parsed = match parse_envelope(&subject, &message.payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, %subject, "unparseable graph entity, dropped");
                return;
            }
        };

        let entity = GraphEntity {
            component: component.to_string(),
            slug: slug.to_string(),
            trace_id: parsed.trace.trace_id,
            payload: parsed.payload,
            ingested_at: Utc::now(),
        };

        let bytes = match serde_json::to_vec(&entity) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, %subject, "failed to re-encode graph entity, dropped");
                return;
            }
        };

        if let Err(err) = self.kv.put(&entity.key(), bytes).await {
            warn!(error = %err, %subject, "graph entity store write failed");
            return;
        }
        info!(component = %entity.component, slug = %entity.slug, "ingested graph entity");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::MemoryKv;

    #[test]
    fn parse_result_subject_splits_component_and_slug() {
        assert_eq!(
            parse_result_subject("workflow.result.plan-entity.add-caching"),
            Some(("plan-entity", "add-caching"))
        );
    }

    #[test]
    fn parse_result_subject_rejects_other_trees() {
        assert_eq!(parse_result_subject("workflow.events.plan.approved"), None);
    }

    #[tokio::test]
    async fn get_returns_none_when_never_ingested() {
        let kv: Arc<dyn KvBackend> = Arc::new(MemoryKv::default());
        kv.put(&entity_key("plan-entity", "other"), b"{}".to_vec()).await.unwrap();
        let bytes = kv.get(&entity_key("plan-entity", "add-caching")).await.unwrap();
        assert!(bytes.is_none());
    }

    #[tokio::test]
    async fn entity_round_trips_through_kv() {
        let kv: Arc<dyn KvBackend> = Arc::new(MemoryKv::default());
        let entity = GraphEntity {
            component: "plan-entity".to_string(),
            slug: "add-caching".to_string(),
            trace_id: "trace-1".to_string(),
            payload: serde_json::json!({"slug": "add-caching"}),
            ingested_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
        };
        kv.put(&entity.key(), serde_json::to_vec(&entity).unwrap()).await.unwrap();
        let bytes = kv.get(&entity.key()).await.unwrap().unwrap();
        let roundtripped: GraphEntity = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(roundtripped.slug, "add-caching");
        assert_eq!(roundtripped.trace_id, "trace-1");
    }
}
