use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use lapin::types::{AMQPValue, FieldTable};

use crate::broker::{BrokerChannel, BrokerError, Publication};
use crate::consumer::HandlerError;
use crate::delivery::{Delivery, DELAY_COUNT_HEADER, DELAY_HEADER};

use super::RetryTopology;

// ── Outcome ────────────────────────────────────────────────────────────────────

/// What the router did with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The original delivery was acknowledged and a copy with an
    /// incremented counter entered the delay ladder.
    Scheduled {
        /// Counter value carried by the rescheduled copy.
        attempt: u32,
        /// Seconds the copy will sit in its delay queue before redelivery.
        delay: u64,
    },
    /// The attempt counter reached the budget; negatively acknowledged.
    Exhausted,
    /// The failure kind is not retryable; negatively acknowledged.
    Rejected,
}

// ── RetryRouter ────────────────────────────────────────────────────────────────

/// Classifies a failed delivery and applies the terminal or rescheduling
/// broker action.
///
/// Holds no per-message state: the decision is reconstructed from the
/// attempt counter carried in the delivery's headers, which keeps it
/// correct across process restarts and across replicas consuming the same
/// queue.
pub struct RetryRouter {
    topology: RetryTopology,
    channel: Arc<dyn BrokerChannel>,
}

impl RetryRouter {
    pub fn new(topology: RetryTopology, channel: Arc<dyn BrokerChannel>) -> Self {
        Self { topology, channel }
    }

    pub fn topology(&self) -> &RetryTopology {
        &self.topology
    }

    /// Route one failed delivery.
    ///
    /// Three-way split:
    /// - failure kind not in the retryable set: nack, [`RetryOutcome::Rejected`];
    /// - budget remaining: ack the original, republish to the retry
    ///   exchange with `backoff-delay` / `backoff-delay-count` headers,
    ///   [`RetryOutcome::Scheduled`];
    /// - counter at or past the budget: nack, [`RetryOutcome::Exhausted`].
    ///
    /// The ack must precede the republish so there is never a moment with
    /// two unacknowledged copies of the same logical message in flight.
    pub async fn handle_retry(
        &self,
        delivery: &Delivery,
        error: &HandlerError,
    ) -> Result<RetryOutcome, BrokerError> {
        let policy = self.topology.policy();

        if !policy.retries(error.kind()) {
            self.channel.nack(delivery.delivery_tag).await?;
            return Ok(RetryOutcome::Rejected);
        }

        let count = delivery.attempt_count();
        if count >= policy.max_retries() {
            tracing::debug!(
                message_id = ?delivery.message_id,
                counter = count,
                "max retries exceeded"
            );
            self.channel.nack(delivery.delivery_tag).await?;
            return Ok(RetryOutcome::Exhausted);
        }

        let delay = policy.backoff(count);

        tracing::debug!(
            message_id = ?delivery.message_id,
            counter = count + 1,
            delay,
            "scheduling retry"
        );

        self.channel.ack(delivery.delivery_tag).await?;

        let mut headers = FieldTable::default();
        headers.insert(DELAY_HEADER.into(), AMQPValue::LongInt(delay as i32));
        headers.insert(DELAY_COUNT_HEADER.into(), AMQPValue::LongInt((count + 1) as i32));

        let publication = Publication {
            message_id: delivery.message_id.clone(),
            timestamp: Some(unix_now()),
            content_type: delivery.content_type.clone(),
            headers,
        };

        self.channel
            .publish(
                self.topology.exchange(),
                &delivery.routing_key,
                &delivery.payload,
                publication,
            )
            .await?;

        Ok(RetryOutcome::Scheduled {
            attempt: count + 1,
            delay,
        })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
