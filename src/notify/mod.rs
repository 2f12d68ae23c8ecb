//! Notification fan-out (spec §1/§2): another external collaborator
//! specified only at the level of its message contract. It subscribes to
//! `user.signal.>` — the same subject tree the event router annotates plans
//! from — and re-publishes each signal under `notification.sent.<channel>`
//! so a delivery surface (email, chat, pager — none of which this repo
//! implements) can subscribe to just the channel it cares about rather than
//! parsing every signal kind itself.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::stream::Stream as JsStream;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::errors::SubstrateError;
use crate::questions::escalator::overdue_subject;
use crate::review::subjects::{error_subject, escalate_subject};
use crate::substrate::{ack, parse_envelope, ConsumerSpec, Substrate};

const CONSUMER: &str = "notification-fanout";
const FETCH_WAIT: Duration = Duration::from_secs(5);
const FETCH_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Which delivery channel a `user.signal.>` subject fans out to. Unknown
/// signal subjects still get a channel — `"general"` — rather than being
/// silently dropped, since a future signal kind arriving here is a bug in
/// routing, not a reason to stop notifying.
fn channel_for(subject: &str) -> &'static str {
    if subject == escalate_subject() {
        "escalation"
    } else if subject == error_subject() {
        "error"
    } else if subject == overdue_subject() {
        "question-overdue"
    } else {
        "general"
    }
}

pub fn sent_subject(channel: &str) -> String {
    format!("notification.sent.{channel}")
}

pub struct NotificationDispatcher {
    substrate: Arc<Substrate>,
    consumer: PullConsumer,
}

impl NotificationDispatcher {
    pub async fn new(substrate: Arc<Substrate>, user_signal_stream: &JsStream) -> Result<Self, SubstrateError> {
        let spec = ConsumerSpec::new(CONSUMER, "user.signal.>").with_deliver_new();
        let consumer = substrate.consumer(user_signal_stream, &spec).await?;
        Ok(Self { substrate, consumer })
    }

    /// Drive the `user.signal.>` fetch loop until `cancel` fires.
    pub async fn run(&self, cancel: &tokio_util::sync::CancellationToken) -> Result<(), SubstrateError> {
        while !cancel.is_cancelled() {
            let batch = match Substrate::fetch_batch(&self.consumer, 1, FETCH_WAIT).await {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(error = %err, "user.signal fetch failed, retrying");
                    tokio::time::sleep(FETCH_RETRY_BACKOFF).await;
                    continue;
                }
            };
            for message in batch {
                self.dispatch(&message).await;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, message), fields(subject = %message.subject))]
    async fn dispatch(&self, message: &async_nats::jetstream::Message) {
        let subject = message.subject.to_string();
        // Fan-out is best-effort by definition (spec §1): a signal this
        // dispatcher can't parse is logged and dropped, not redelivered.
        ack(message).await;

        let parsed = match parse_envelope(&subject, &message.payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, %subject, "unparseable signal, dropped");
                return;
            }
        };

        let channel = channel_for(&subject);
        info!(%channel, %subject, trace_id = %parsed.trace.trace_id, "dispatching notification");
        self.substrate
            .publish_best_effort(
                sent_subject(channel),
                &json!({
                    "channel": channel,
                    "source_subject": subject,
                    "trace_id": parsed.trace.trace_id,
                    "payload": parsed.payload,
                }),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalate_signal_routes_to_escalation_channel() {
        assert_eq!(channel_for(escalate_subject()), "escalation");
    }

    #[test]
    fn error_signal_routes_to_error_channel() {
        assert_eq!(channel_for(error_subject()), "error");
    }

    #[test]
    fn question_overdue_signal_routes_to_question_overdue_channel() {
        assert_eq!(channel_for(overdue_subject()), "question-overdue");
    }

    #[test]
    fn unrecognized_signal_routes_to_general_channel() {
        assert_eq!(channel_for("user.signal.unknown"), "general");
    }

    #[test]
    fn sent_subject_is_namespaced_under_notification_sent() {
        assert_eq!(sent_subject("escalation"), "notification.sent.escalation");
    }
}
