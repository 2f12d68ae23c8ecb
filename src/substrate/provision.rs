//! Idempotent get-or-create for streams, durable pull consumers, and KV
//! buckets. Every call here must be safe to run again against a deployment
//! that already has the resource — the orchestrator provisions its whole
//! substrate on every startup rather than shipping a separate migration step.

use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::{pull::Config as PullConfig, DeliverPolicy, PullConsumer},
    kv::{Config as KvConfig, Store},
    stream::{Config as StreamConfig, Stream as JsStream},
};
use tracing::{debug, instrument};

use crate::errors::SubstrateError;

#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub name: String,
    pub subjects: Vec<String>,
    /// `None` keeps messages forever (used by the message log); `Some(n)`
    /// caps retained messages per subject (used by high-volume event streams).
    pub max_messages_per_subject: Option<i64>,
}

impl StreamSpec {
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            max_messages_per_subject: None,
        }
    }

    pub fn with_max_messages_per_subject(mut self, n: i64) -> Self {
        self.max_messages_per_subject = Some(n);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    pub durable_name: String,
    pub filter_subject: String,
    pub ack_wait: Duration,
    pub max_deliver: i64,
    /// `All` replays retained messages on first creation (the default, used
    /// by durable triggers/events consumers); `New` only delivers messages
    /// published after the consumer is created (used by the one-shot
    /// promote-wait consumer, where replaying history would hand back a
    /// stale result).
    pub deliver_new: bool,
}

impl ConsumerSpec {
    pub fn new(durable_name: impl Into<String>, filter_subject: impl Into<String>) -> Self {
        Self {
            durable_name: durable_name.into(),
            filter_subject: filter_subject.into(),
            ack_wait: Duration::from_secs(300),
            max_deliver: 5,
            deliver_new: false,
        }
    }

    pub fn with_ack_wait(mut self, d: Duration) -> Self {
        self.ack_wait = d;
        self
    }

    pub fn with_max_deliver(mut self, n: i64) -> Self {
        self.max_deliver = n;
        self
    }

    pub fn with_deliver_new(mut self) -> Self {
        self.deliver_new = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BucketSpec {
    pub bucket: String,
    pub max_age: Option<Duration>,
    pub history: i64,
}

impl BucketSpec {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            max_age: None,
            history: 1,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.max_age = Some(ttl);
        self
    }

    pub fn with_history(mut self, n: i64) -> Self {
        self.history = n;
        self
    }
}

#[instrument(skip(ctx), fields(stream = %spec.name))]
pub async fn get_or_create_stream(
    ctx: &jetstream::Context,
    spec: &StreamSpec,
) -> Result<JsStream, SubstrateError> {
    let config = StreamConfig {
        name: spec.name.clone(),
        subjects: spec.subjects.clone(),
        max_messages_per_subject: spec.max_messages_per_subject.unwrap_or(-1),
        ..Default::default()
    };
    ctx.get_or_create_stream(config)
        .await
        .map_err(|e| SubstrateError::StreamProvision {
            name: spec.name.clone(),
            source: anyhow::Error::from(e),
        })
}

#[instrument(skip(stream), fields(stream = %stream.cached_info().config.name, consumer = %spec.durable_name))]
pub async fn get_or_create_consumer(
    stream: &JsStream,
    spec: &ConsumerSpec,
) -> Result<PullConsumer, SubstrateError> {
    let config = PullConfig {
        durable_name: Some(spec.durable_name.clone()),
        filter_subject: spec.filter_subject.clone(),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        ack_wait: spec.ack_wait,
        max_deliver: spec.max_deliver,
        deliver_policy: if spec.deliver_new {
            DeliverPolicy::New
        } else {
            DeliverPolicy::All
        },
        ..Default::default()
    };
    let name = stream.cached_info().config.name.clone();
    stream
        .get_or_create_consumer(&spec.durable_name, config)
        .await
        .map_err(|e| SubstrateError::ConsumerProvision {
            stream: name,
            name: spec.durable_name.clone(),
            source: anyhow::Error::from(e),
        })
}

/// Create (not get-or-create) a short-lived durable consumer for the
/// synchronous promote path (spec §4.3.3): a fresh `promote-wait-<id>`
/// name each call, `DeliverPolicy::New` so it never replays history, and
/// deleted by the caller once the one result it wants has arrived.
#[instrument(skip(stream), fields(stream = %stream.cached_info().config.name, consumer = %spec.durable_name))]
pub async fn create_ephemeral_consumer(
    stream: &JsStream,
    spec: &ConsumerSpec,
) -> Result<PullConsumer, SubstrateError> {
    get_or_create_consumer(stream, spec).await
}

/// Delete a durable consumer by name, used to clean up the promote-wait
/// consumer once its single result has been collected (or the wait times
/// out). Best-effort from the caller's perspective: callers run this with
/// an independent cleanup context so it survives request cancellation.
#[instrument(skip(stream), fields(stream = %stream.cached_info().config.name))]
pub async fn delete_consumer(stream: &JsStream, name: &str) -> Result<(), SubstrateError> {
    stream
        .delete_consumer(name)
        .await
        .map_err(|e| SubstrateError::ConsumerProvision {
            stream: stream.cached_info().config.name.clone(),
            name: name.to_string(),
            source: anyhow::Error::from(e),
        })?;
    Ok(())
}

#[instrument(skip(ctx), fields(bucket = %spec.bucket))]
pub async fn get_or_create_bucket(
    ctx: &jetstream::Context,
    spec: &BucketSpec,
) -> Result<Store, SubstrateError> {
    match ctx.get_key_value(&spec.bucket).await {
        Ok(store) => {
            debug!("kv bucket already exists");
            Ok(store)
        }
        Err(_) => {
            let config = KvConfig {
                bucket: spec.bucket.clone(),
                max_age: spec.max_age.unwrap_or_default(),
                history: spec.history.clamp(1, 64) as i64,
                ..Default::default()
            };
            ctx.create_key_value(config)
                .await
                .map_err(|e| SubstrateError::BucketProvision {
                    name: spec.bucket.clone(),
                    source: anyhow::Error::from(e),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_spec_defaults_to_unlimited_retention() {
        let spec = StreamSpec::new("WORKFLOW_LOG", vec!["workflow.>".to_string()]);
        assert!(spec.max_messages_per_subject.is_none());
    }

    #[test]
    fn consumer_spec_builder_overrides_defaults() {
        let spec = ConsumerSpec::new("plan-review-loop", "workflow.trigger.plan-review-loop")
            .with_ack_wait(Duration::from_secs(60))
            .with_max_deliver(3);
        assert_eq!(spec.ack_wait, Duration::from_secs(60));
        assert_eq!(spec.max_deliver, 3);
    }

    #[test]
    fn bucket_spec_history_clamped_at_use_site_not_construction() {
        let spec = BucketSpec::new("REACTIVE_STATE").with_history(100);
        assert_eq!(spec.history, 100);
    }
}
