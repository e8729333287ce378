use lapin::{
    types::{AMQPValue, FieldTable},
    ExchangeKind,
};
use tokio::sync::OnceCell;

use crate::broker::{BrokerChannel, BrokerError};
use crate::delivery::DELAY_HEADER;

use super::RetryPolicy;

/// The backoff ladder for one consumer type: a headers exchange plus one
/// time-delayed queue per retry attempt.
///
/// Each delay queue holds messages for its TTL and then dead-letters them
/// back to the main exchange, where they re-enter the consumer's queue via
/// the original routing key. Declaration happens once at worker startup,
/// before the subscription begins; any failure is fatal to startup and is
/// propagated rather than retried, since a half-declared ladder would
/// silently drop rescheduled messages.
pub struct RetryTopology {
    policy: RetryPolicy,
    exchange: String,
    main_exchange: String,
    exchange_declared: OnceCell<()>,
}

impl RetryTopology {
    /// `main_exchange` is where expired messages are dead-lettered back to;
    /// it must be the exchange the consumer's queue is bound on.
    pub fn new(policy: RetryPolicy, queue_name: &str, main_exchange: impl Into<String>) -> Self {
        let exchange = policy.exchange_name(queue_name);
        Self {
            policy,
            exchange,
            main_exchange: main_exchange.into(),
            exchange_declared: OnceCell::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Resolved name of the retry exchange.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Name of the delay queue holding messages for `delay` seconds.
    ///
    /// Names are derived from the delay value, not the attempt index, so
    /// two attempts mapping to the same delay would share one queue. The
    /// fixed backoff formula is strictly increasing, which keeps the
    /// ladder at exactly `max_retries` distinct queues.
    pub fn queue_name(&self, delay: u64) -> String {
        format!("{}.{delay}", self.exchange)
    }

    /// The ladder's delay values, one per attempt `0..max_retries`.
    pub fn delays(&self) -> Vec<u64> {
        (0..self.policy.max_retries())
            .map(|attempt| self.policy.backoff(attempt))
            .collect()
    }

    /// Declare the retry exchange and every delay queue.
    ///
    /// The exchange declaration runs at most once per topology instance,
    /// also under concurrent first calls. Queue declarations are re-issued
    /// on every call and rely on the broker treating an identical
    /// redeclaration as a no-op.
    pub async fn declare(&self, channel: &dyn BrokerChannel) -> Result<(), BrokerError> {
        tracing::info!(exchange = %self.exchange, "setting up retry queues");

        self.ensure_exchange(channel).await?;

        for delay in self.delays() {
            self.create_retry_queue(channel, delay).await?;
        }

        Ok(())
    }

    /// Declare one delay queue and bind it to the retry exchange.
    ///
    /// The queue's TTL is the delay in milliseconds and its dead-letter
    /// target is the main exchange. The binding matches messages whose
    /// `backoff-delay` header equals this queue's delay, under all-match
    /// semantics.
    pub async fn create_retry_queue(
        &self,
        channel: &dyn BrokerChannel,
        delay: u64,
    ) -> Result<(), BrokerError> {
        let queue = self.queue_name(delay);

        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.main_exchange.as_bytes().to_vec().into()),
        );
        args.insert("x-message-ttl".into(), AMQPValue::LongInt((delay * 1_000) as i32));

        channel
            .declare_queue(&queue, self.policy.exchange_durable(), args)
            .await?;

        let mut bind_args = FieldTable::default();
        bind_args.insert(DELAY_HEADER.into(), AMQPValue::LongInt(delay as i32));
        bind_args.insert(
            "x-match".into(),
            AMQPValue::LongString("all".as_bytes().to_vec().into()),
        );

        channel.bind_queue(&queue, &self.exchange, "", bind_args).await
    }

    async fn ensure_exchange(&self, channel: &dyn BrokerChannel) -> Result<(), BrokerError> {
        self.exchange_declared
            .get_or_try_init(|| async {
                channel
                    .declare_exchange(
                        &self.exchange,
                        ExchangeKind::Headers,
                        self.policy.exchange_durable(),
                    )
                    .await
            })
            .await?;
        Ok(())
    }
}
