use std::time::Duration;

use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, warn};

use super::notifier::Notifier;
use crate::state::PendingMessage;

/// Limits applied to one pass over the outbox
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    /// A message failing this many times is dropped
    pub max_attempts: u32,
    /// Bound on a single send
    pub send_timeout: Duration,
    /// Bound on the whole pass, sends included; unsent messages wait for the
    /// next cycle
    pub budget: Duration,
}

#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: Vec<PendingMessage>,
    pub dropped: Vec<PendingMessage>,
    /// Messages to keep in the outbox, attempt counts updated
    pub remaining: Vec<PendingMessage>,
}

/// Make one attempt per queued message, oldest first.
///
/// Transport errors never propagate: a failed message stays queued with its
/// attempt count raised, or is dropped once it reaches `max_attempts`.
pub async fn deliver_outbox(notifier: &dyn Notifier, outbox: Vec<PendingMessage>, policy: &DeliveryPolicy) -> DeliveryReport {
    let spent_at = Instant::now() + policy.budget;
    let mut report = DeliveryReport::default();

    for mut message in outbox {
        let now = Instant::now();
        if now >= spent_at {
            debug!(id = %message.id, "Delivery budget spent, keeping message queued");
            report.remaining.push(message);
            continue;
        }

        // A send never outlives the pass
        let send_deadline = (now + policy.send_timeout).min(spent_at);
        let failure = match timeout_at(send_deadline, notifier.send(&message.text)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("no response within {:?}", send_deadline - now)),
        };

        match failure {
            None => {
                debug!(id = %message.id, "Message delivered");
                report.delivered.push(message);
            }
            Some(reason) => {
                message.attempts += 1;
                if message.attempts >= policy.max_attempts {
                    error!(
                        id = %message.id,
                        attempts = message.attempts,
                        "Dropping message after repeated delivery failures: {}",
                        reason
                    );
                    report.dropped.push(message);
                } else {
                    warn!(id = %message.id, attempts = message.attempts, "Message delivery failed, will retry: {}", reason);
                    report.remaining.push(message);
                }
            }
        }
    }

    report
}
