//! The persistence substrate: one `Substrate` handle wrapping a connected
//! NATS client plus its JetStream context, created once at startup and
//! shared behind an `Arc` by every processor component.
//!
//! Two concerns live here:
//! - `provision` — idempotent get-or-create for streams, durable pull
//!   consumers, and KV buckets, so starting the orchestrator twice against
//!   the same NATS deployment never errors on "already exists".
//! - `envelope` — the dual-format parser every consumer runs a raw message
//!   through before it touches a typed payload.

mod envelope;
mod kv;
mod provision;

pub use envelope::{parse_envelope, ParsedEnvelope};
pub use kv::{BucketKv, KvBackend, MemoryKv};
pub use provision::{BucketSpec, ConsumerSpec, StreamSpec};

use std::time::Duration;

use async_nats::jetstream::{self, consumer::PullConsumer, kv::Store, stream::Stream as JsStream};
use tracing::{info, instrument};

use crate::errors::SubstrateError;

/// The one thing every component holds an `Arc<Substrate>` to.
pub struct Substrate {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl Substrate {
    #[instrument(skip_all, fields(url = %url))]
    pub async fn connect(url: &str) -> Result<Self, SubstrateError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|source| SubstrateError::Connect {
                url: url.to_string(),
                source,
            })?;
        info!("connected to NATS");
        let jetstream = jetstream::new(client.clone());
        Ok(Self { client, jetstream })
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Get-or-create a work-queue or limits stream per `spec`.
    pub async fn stream(&self, spec: &StreamSpec) -> Result<JsStream, SubstrateError> {
        provision::get_or_create_stream(&self.jetstream, spec).await
    }

    /// Get-or-create a durable pull consumer on an already-provisioned stream.
    pub async fn consumer(
        &self,
        stream: &JsStream,
        spec: &ConsumerSpec,
    ) -> Result<PullConsumer, SubstrateError> {
        provision::get_or_create_consumer(stream, spec).await
    }

    /// Create the short-lived consumer backing a synchronous promote wait.
    pub async fn ephemeral_consumer(
        &self,
        stream: &JsStream,
        spec: &ConsumerSpec,
    ) -> Result<PullConsumer, SubstrateError> {
        provision::create_ephemeral_consumer(stream, spec).await
    }

    /// Delete a durable consumer by name (used to clean up after a promote
    /// wait). Logs but never propagates failure when called from a
    /// best-effort cleanup context.
    pub async fn delete_consumer(&self, stream: &JsStream, name: &str) -> Result<(), SubstrateError> {
        provision::delete_consumer(stream, name).await
    }

    /// Get-or-create a KV bucket per `spec`.
    pub async fn bucket(&self, spec: &BucketSpec) -> Result<Store, SubstrateError> {
        provision::get_or_create_bucket(&self.jetstream, spec).await
    }

    /// Publish a JSON-encoded envelope, waiting for the broker's ack.
    #[instrument(skip(self, payload), fields(subject = %subject))]
    pub async fn publish_json(
        &self,
        subject: impl Into<String>,
        payload: &serde_json::Value,
    ) -> Result<(), SubstrateError> {
        let subject = subject.into();
        let bytes = serde_json::to_vec(payload).map_err(|e| SubstrateError::Publish {
            subject: subject.clone(),
            source: anyhow::Error::from(e),
        })?;
        let ack = self
            .jetstream
            .publish(subject.clone(), bytes.into())
            .await
            .map_err(|e| SubstrateError::Publish {
                subject: subject.clone(),
                source: anyhow::Error::from(e),
            })?;
        ack.await.map_err(|e| SubstrateError::Publish {
            subject,
            source: anyhow::Error::from(e),
        })?;
        Ok(())
    }

    /// Best-effort publish: failures are logged, never returned. Used for
    /// fan-out to collaborator surfaces (graph ingester, notifications)
    /// that must never stall the event router.
    pub async fn publish_best_effort(&self, subject: impl Into<String>, payload: &serde_json::Value) {
        let subject = subject.into();
        if let Err(err) = self.publish_json(subject.clone(), payload).await {
            tracing::warn!(%subject, error = %err, "best-effort publish failed");
        }
    }

    pub async fn fetch_batch(
        consumer: &PullConsumer,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<jetstream::Message>, SubstrateError> {
        use futures_util::StreamExt;

        let mut messages = consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires.as_millis() as u64)
            .messages()
            .await
            .map_err(|e| SubstrateError::Fetch {
                consumer: consumer.cached_info().name.clone(),
                source: anyhow::Error::from(e),
            })?;

        let mut batch = Vec::with_capacity(max_messages);
        while let Some(msg) = messages.next().await {
            match msg {
                Ok(m) => batch.push(m),
                Err(e) => {
                    return Err(SubstrateError::Fetch {
                        consumer: consumer.cached_info().name.clone(),
                        source: anyhow::Error::from(e),
                    })
                }
            }
        }
        Ok(batch)
    }
}

/// Acknowledge a message, logging but not propagating failure: an ack that
/// never lands just means the broker redelivers, which every consumer here
/// is built to tolerate.
pub async fn ack(message: &jetstream::Message) {
    if let Err(err) = message.ack().await {
        tracing::warn!(error = ?err, "ack failed");
    }
}

/// Negative-acknowledge with an optional redelivery delay.
pub async fn nak(message: &jetstream::Message, delay: Option<Duration>) {
    let kind = jetstream::AckKind::Nak(delay);
    if let Err(err) = message.ack_with(kind).await {
        tracing::warn!(error = ?err, "nak failed");
    }
}

/// Terminate redelivery entirely — used once a message's budget is
/// exhausted or its payload is permanently malformed.
pub async fn term(message: &jetstream::Message) {
    if let Err(err) = message.ack_with(jetstream::AckKind::Term).await {
        tracing::warn!(error = ?err, "term failed");
    }
}
