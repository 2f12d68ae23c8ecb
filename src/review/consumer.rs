//! Consumer-loop wiring for one review kind (spec §4.3.1): a durable pull
//! consumer on `WORKFLOW`, filtered to `workflow.trigger.<loop-name>`,
//! fetched one message at a time with a 5 s max wait so cancellation stays
//! observable even when the bus is idle.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::stream::Stream as JsStream;
use planloop_types::ReviewKind;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, warn};

use super::engine::{is_retryable, ReviewLoopEngine};
use super::subjects;
use crate::errors::SubstrateError;
use crate::substrate::{ack, nak, parse_envelope, term, ConsumerSpec, Substrate};

const FETCH_WAIT: Duration = Duration::from_secs(5);
const FETCH_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const ACK_WAIT: Duration = Duration::from_secs(300);
const MAX_DELIVER: i64 = 3;
const NAK_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TriggerPayload {
    slug: String,
    #[serde(default)]
    description: String,
}

/// Owns the durable consumer for one `ReviewKind` and drives its fetch loop
/// until `cancel` fires.
pub struct ReviewConsumer {
    kind: ReviewKind,
    consumer: PullConsumer,
    engine: Arc<ReviewLoopEngine>,
}

impl ReviewConsumer {
    /// Get-or-create the durable consumer for `kind` on `stream` and wrap it
    /// up ready to run.
    pub async fn new(
        substrate: &Substrate,
        engine: Arc<ReviewLoopEngine>,
        stream: &JsStream,
        kind: ReviewKind,
    ) -> Result<Self, SubstrateError> {
        let spec = ConsumerSpec::new(kind.loop_name(), subjects::trigger_subject(kind))
            .with_ack_wait(ACK_WAIT)
            .with_max_deliver(MAX_DELIVER);
        let consumer = substrate.consumer(stream, &spec).await?;
        Ok(Self { kind, consumer, engine })
    }

    /// Fetch-and-dispatch until `cancel` is triggered. One failed message
    /// never stops the loop; it is nak'd or term'd and the next fetch runs.
    #[instrument(skip(self, cancel), fields(kind = %self.kind))]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), SubstrateError> {
        while !cancel.is_cancelled() {
            let batch = match Substrate::fetch_batch(&self.consumer, 1, FETCH_WAIT).await {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(error = %err, "trigger fetch failed, retrying");
                    tokio::time::sleep(FETCH_RETRY_BACKOFF).await;
                    continue;
                }
            };

            for message in batch {
                self.handle(&message, cancel).await;
            }
        }
        Ok(())
    }

    async fn handle(&self, message: &async_nats::jetstream::Message, cancel: &CancellationToken) {
        let subject = message.subject.to_string();
        let parsed = match parse_envelope(&subject, &message.payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(error = %err, %subject, "unparseable trigger envelope, terminating redelivery");
                term(message).await;
                return;
            }
        };

        let trigger: TriggerPayload = match serde_json::from_value(parsed.payload) {
            Ok(trigger) => trigger,
            Err(err) => {
                error!(error = %err, %subject, "trigger payload missing slug, terminating redelivery");
                term(message).await;
                return;
            }
        };

        let result = self
            .engine
            .run_trigger(self.kind, &parsed.trace, &trigger.slug, &trigger.description, cancel)
            .await;

        match result {
            Ok(()) => ack(message).await,
            Err(err) if is_retryable(&err) => {
                warn!(error = %err, slug = %trigger.slug, "review loop trigger failed, nak'ing for redelivery");
                nak(message, Some(NAK_DELAY)).await;
            }
            Err(err) => {
                error!(error = %err, slug = %trigger.slug, "review loop trigger failed permanently, terminating redelivery");
                term(message).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_payload_defaults_description_to_empty() {
        let payload: TriggerPayload = serde_json::from_value(serde_json::json!({"slug": "add-caching"})).unwrap();
        assert_eq!(payload.slug, "add-caching");
        assert!(payload.description.is_empty());
    }
}
