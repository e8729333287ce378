use std::sync::Arc;

use lapin::{types::FieldTable, ExchangeKind};

use crate::broker::{BrokerChannel, BrokerError};
use crate::consumer::{Consumer, Context, HandlerError};
use crate::delivery::Delivery;
use crate::metrics::Metrics;
use crate::observer::FailureObserver;
use crate::retry::{RetryOutcome, RetryRouter, RetryTopology};

// ── Error ──────────────────────────────────────────────────────────────────────

/// Queue or topology provisioning failed. Fatal to worker startup.
#[derive(Debug)]
pub enum SetupError {
    MainExchange(BrokerError),
    Queue(BrokerError),
    Binding(BrokerError),
    RetryTopology(BrokerError),
}

impl std::fmt::Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MainExchange(e) => write!(f, "main exchange setup failed: {e}"),
            Self::Queue(e) => write!(f, "queue setup failed: {e}"),
            Self::Binding(e) => write!(f, "queue binding failed: {e}"),
            Self::RetryTopology(e) => write!(f, "retry topology setup failed: {e}"),
        }
    }
}

impl std::error::Error for SetupError {}

// ── Dispatcher ─────────────────────────────────────────────────────────────────

/// Per-consumer-type dispatch: queue provisioning and the per-delivery
/// decode / handle / acknowledge cycle.
///
/// Retry capability is composed in, not inherited: if the consumer's
/// registration carries a [`crate::retry::RetryPolicy`], failures are
/// delegated to a [`RetryRouter`] built here once; otherwise every failure
/// finalizes with a negative acknowledgement.
///
/// Every failure path ends in exactly one terminal broker action and then
/// notifies all registered failure observers, including when the failure
/// was recovered by scheduling a retry. Handler errors are never
/// re-raised to the caller.
pub struct Dispatcher<C: Consumer> {
    consumer: Arc<C>,
    channel: Arc<dyn BrokerChannel>,
    main_exchange: String,
    router: Option<RetryRouter>,
    observers: Vec<Arc<dyn FailureObserver>>,
    metrics: Arc<Metrics>,
}

impl<C: Consumer> Dispatcher<C> {
    /// Snapshot the consumer's retry policy (if any) and wire the router.
    /// The policy read here is the one the declared topology will match;
    /// later mutation of consumer-side state has no effect.
    pub fn new(
        consumer: Arc<C>,
        channel: Arc<dyn BrokerChannel>,
        main_exchange: impl Into<String>,
        observers: Vec<Arc<dyn FailureObserver>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let main_exchange = main_exchange.into();

        let router = consumer.retry_policy().map(|policy| {
            let topology = RetryTopology::new(policy, consumer.queue_name(), main_exchange.clone());
            RetryRouter::new(topology, Arc::clone(&channel))
        });

        Self {
            consumer,
            channel,
            main_exchange,
            router,
            observers,
            metrics,
        }
    }

    pub fn queue_name(&self) -> &str {
        self.consumer.queue_name()
    }

    /// Declare everything this consumer needs on the broker: the main
    /// exchange, the consumer queue, its routing-key bindings, and (for
    /// retry-capable consumers) the backoff ladder.
    ///
    /// Runs once at startup before the subscription is opened. Errors
    /// propagate; provisioning is never retried from here.
    pub async fn setup_queue(&self) -> Result<(), SetupError> {
        let queue = self.consumer.queue_name();
        tracing::info!(queue, "setting up queue");

        self.channel
            .declare_exchange(&self.main_exchange, ExchangeKind::Topic, true)
            .await
            .map_err(SetupError::MainExchange)?;

        self.channel
            .declare_queue(queue, self.consumer.queue_durable(), FieldTable::default())
            .await
            .map_err(SetupError::Queue)?;

        for routing_key in self.consumer.routing_keys() {
            self.channel
                .bind_queue(queue, &self.main_exchange, &routing_key, FieldTable::default())
                .await
                .map_err(SetupError::Binding)?;
        }

        if let Some(router) = &self.router {
            router
                .topology()
                .declare(self.channel.as_ref())
                .await
                .map_err(SetupError::RetryTopology)?;
        }

        Ok(())
    }

    /// Process one delivery to a terminal action.
    ///
    /// Decode, invoke the handler exactly once, then:
    /// - success: ack;
    /// - failure (handler or decode): route through the retry router or
    ///   finalize, then notify observers.
    pub async fn handle_message(&self, delivery: Delivery) {
        self.metrics.inc_in_flight();
        self.log_delivery(&delivery);

        match self.consumer.decode(&delivery.payload) {
            Err(error) => self.dispose(&delivery, error).await,
            Ok(message) => {
                let ctx = Context::new(self.channel.as_ref(), &delivery);
                match self.consumer.handle(&ctx, message).await {
                    Ok(()) => match self.channel.ack(delivery.delivery_tag).await {
                        Ok(()) => self.metrics.inc_succeeded(),
                        Err(e) => {
                            tracing::error!(
                                queue = self.consumer.queue_name(),
                                error = %e,
                                "ack of successful delivery failed"
                            );
                        }
                    },
                    Err(error) => self.dispose(&delivery, error).await,
                }
            }
        }

        self.metrics.dec_in_flight();
    }

    // ── Failure path ──────────────────────────────────────────────────────────

    async fn dispose(&self, delivery: &Delivery, error: HandlerError) {
        match &self.router {
            Some(router) => match router.handle_retry(delivery, &error).await {
                Ok(RetryOutcome::Scheduled { attempt, delay }) => {
                    self.metrics.inc_retried();
                    tracing::info!(
                        queue = self.consumer.queue_name(),
                        message_id = ?delivery.message_id,
                        attempt,
                        delay,
                        "🔄 retry scheduled: {}",
                        error
                    );
                }
                Ok(RetryOutcome::Exhausted) => {
                    self.metrics.inc_exhausted();
                    tracing::warn!(
                        queue = self.consumer.queue_name(),
                        message_id = ?delivery.message_id,
                        "retries exhausted: {}",
                        error
                    );
                }
                Ok(RetryOutcome::Rejected) => {
                    self.metrics.inc_rejected();
                    tracing::warn!(
                        queue = self.consumer.queue_name(),
                        message_id = ?delivery.message_id,
                        kind = %error.kind(),
                        "non-retryable failure: {}",
                        error
                    );
                }
                Err(e) => {
                    tracing::error!(
                        queue = self.consumer.queue_name(),
                        message_id = ?delivery.message_id,
                        error = %e,
                        "retry routing failed"
                    );
                }
            },
            None => match self.channel.nack(delivery.delivery_tag).await {
                Ok(()) => {
                    self.metrics.inc_rejected();
                    tracing::warn!(
                        queue = self.consumer.queue_name(),
                        message_id = ?delivery.message_id,
                        "failure finalized: {}",
                        error
                    );
                }
                Err(e) => {
                    tracing::error!(
                        queue = self.consumer.queue_name(),
                        error = %e,
                        "nack of failed delivery failed"
                    );
                }
            },
        }

        for observer in &self.observers {
            observer.notify(delivery, &error);
        }
    }

    fn log_delivery(&self, delivery: &Delivery) {
        if self.consumer.payload_binary() {
            tracing::debug!(
                message_id = ?delivery.message_id,
                routing_key = %delivery.routing_key,
                queue = self.consumer.queue_name(),
                payload_bytes = delivery.payload.len(),
                "message received"
            );
        } else {
            tracing::debug!(
                message_id = ?delivery.message_id,
                routing_key = %delivery.routing_key,
                queue = self.consumer.queue_name(),
                payload = %String::from_utf8_lossy(&delivery.payload),
                "message received"
            );
        }
    }
}
