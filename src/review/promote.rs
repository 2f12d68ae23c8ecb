//! Synchronous promote path (spec §4.3.3): an operator request that wants
//! to wait for one review-loop result instead of polling. Subscribes on an
//! ephemeral consumer before the trigger is published, so the result can
//! never land before anyone is listening for it.

use std::time::Duration;

use async_nats::jetstream::stream::Stream as JsStream;
use serde_json::Value;
use tracing::warn;

use super::subjects;
use crate::errors::SubstrateError;
use crate::substrate::{ConsumerSpec, Substrate};

const PROMOTE_WAIT: Duration = Duration::from_secs(120);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait up to 120 s for the next message on `workflow.result.<component>.<slug>`,
/// calling `publish_trigger` only after the ephemeral consumer is live.
/// `publish_trigger` is the caller's closure that actually emits the
/// `workflow.trigger.<loop-name>` message once the listener is ready.
pub async fn promote_and_wait<F, Fut>(
    substrate: &Substrate,
    result_stream: &JsStream,
    component: &str,
    slug: &str,
    request_id: &str,
    publish_trigger: F,
) -> Result<Option<Value>, SubstrateError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<(), SubstrateError>>,
{
    let consumer_name = format!("promote-wait-{}", &request_id[..request_id.len().min(8)]);
    let spec = ConsumerSpec::new(&consumer_name, subjects::result_subject(component, slug)).with_deliver_new();

    let consumer = substrate.ephemeral_consumer(result_stream, &spec).await?;

    publish_trigger().await?;

    let parsed = match Substrate::fetch_batch(&consumer, 1, PROMOTE_WAIT).await {
        Ok(messages) => {
            let mut value = None;
            if let Some(msg) = messages.into_iter().next() {
                value = serde_json::from_slice::<Value>(&msg.payload).ok();
                crate::substrate::ack(&msg).await;
            } else {
                warn!(%consumer_name, "promote-wait timed out after 120s with no result");
            }
            value
        }
        Err(err) => {
            warn!(error = %err, "promote-wait fetch failed");
            None
        }
    };

    // Independent cleanup context: deleting the ephemeral consumer must
    // survive the caller's own request being cancelled.
    let cleanup = tokio::time::timeout(CLEANUP_TIMEOUT, substrate.delete_consumer(result_stream, &consumer_name));
    if let Err(err) = cleanup.await {
        warn!(%consumer_name, error = %err, "promote-wait consumer cleanup timed out");
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_name_truncates_request_id_to_eight_chars() {
        let request_id = "abcdefgh-ijkl-mnop";
        let name = format!("promote-wait-{}", &request_id[..request_id.len().min(8)]);
        assert_eq!(name, "promote-wait-abcdefgh");
    }

    #[test]
    fn consumer_name_handles_short_request_ids() {
        let request_id = "abc";
        let name = format!("promote-wait-{}", &request_id[..request_id.len().min(8)]);
        assert_eq!(name, "promote-wait-abc");
    }
}
