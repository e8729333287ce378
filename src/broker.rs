use std::time::Duration;

use async_trait::async_trait;
use deadpool_lapin::Manager;
use lapin::{
    options::{
        BasicAckOptions, BasicNackOptions, BasicPublishOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ConnectionProperties, ExchangeKind,
};

/// Re-exported so callers can build and hold the pool without importing
/// deadpool_lapin themselves.
pub type Pool = deadpool_lapin::Pool;

// ── Error ──────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum BrokerError {
    /// Exchange or queue declaration was refused or failed.
    Declare(String),
    Bind(String),
    Publish(String),
    Ack(String),
    Nack(String),
    /// Could not establish a connection after all attempts.
    Connection(String),
    /// Failed to build the connection pool itself.
    Pool(String),
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Declare(m) => write!(f, "declaration failed: {m}"),
            Self::Bind(m) => write!(f, "bind failed: {m}"),
            Self::Publish(m) => write!(f, "publish failed: {m}"),
            Self::Ack(m) => write!(f, "ack failed: {m}"),
            Self::Nack(m) => write!(f, "nack failed: {m}"),
            Self::Connection(m) => write!(f, "broker connection failed: {m}"),
            Self::Pool(m) => write!(f, "connection pool build failed: {m}"),
        }
    }
}

impl std::error::Error for BrokerError {}

// ── Publication ────────────────────────────────────────────────────────────────

/// Properties attached to an outbound message.
///
/// Everything published through [`BrokerChannel::publish`] is persistent;
/// the retry ladder is useless if the broker drops scheduled copies on
/// restart.
#[derive(Debug, Clone, Default)]
pub struct Publication {
    pub message_id: Option<String>,
    /// Unix seconds. Stamped by the publisher, not the broker.
    pub timestamp: Option<u64>,
    pub content_type: Option<String>,
    pub headers: FieldTable,
}

// ── BrokerChannel ──────────────────────────────────────────────────────────────

/// The narrow set of channel operations the dispatch and retry code needs.
///
/// One implementation wraps a live lapin channel ([`AmqpChannel`]); tests
/// substitute a recorder. Ack and nack act on the delivery tag of the
/// channel the message arrived on, so a dispatcher must keep using the
/// channel its subscription was opened on.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError>;

    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        args: FieldTable,
    ) -> Result<(), BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        args: FieldTable,
    ) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        publication: Publication,
    ) -> Result<(), BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Negative-acknowledge without requeue. Messages rejected here are the
    /// broker's to route (parking queue, discard) per queue configuration.
    async fn nack(&self, delivery_tag: u64) -> Result<(), BrokerError>;
}

// ── AmqpChannel ────────────────────────────────────────────────────────────────

/// [`BrokerChannel`] over a live AMQP channel.
///
/// Cloning is cheap (the channel is Arc-backed) and the clone publishes on
/// the same underlying channel; lapin serialises writes internally.
#[derive(Clone)]
pub struct AmqpChannel {
    channel: Channel,
}

impl AmqpChannel {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                name,
                kind,
                ExchangeDeclareOptions {
                    durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Declare(format!("exchange '{name}': {e}")))
    }

    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        args: FieldTable,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable,
                    ..Default::default()
                },
                args,
            )
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Declare(format!("queue '{name}': {e}")))
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        args: FieldTable,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(queue, exchange, routing_key, QueueBindOptions::default(), args)
            .await
            .map_err(|e| BrokerError::Bind(format!("'{queue}' to '{exchange}': {e}")))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        publication: Publication,
    ) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default()
            .with_delivery_mode(2) // persistent
            .with_headers(publication.headers);

        if let Some(id) = publication.message_id {
            properties = properties.with_message_id(id.into());
        }
        if let Some(ts) = publication.timestamp {
            properties = properties.with_timestamp(ts);
        }
        if let Some(ct) = publication.content_type {
            properties = properties.with_content_type(ct.into());
        }

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Publish(format!("to '{exchange}': {e}")))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack(format!("tag {delivery_tag}: {e}")))
    }

    async fn nack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue: false,
                },
            )
            .await
            .map_err(|e| BrokerError::Nack(format!("tag {delivery_tag}: {e}")))
    }
}

// ── Connection pool ────────────────────────────────────────────────────────────

const MAX_CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Build a connection pool and verify connectivity.
///
/// The broker is often still starting when the worker comes up, so the
/// first connection is attempted up to [`MAX_CONNECT_ATTEMPTS`] times with
/// a fixed [`CONNECT_RETRY_INTERVAL`] between attempts. This is the only
/// retry loop that lives outside the message path.
pub async fn build_pool(url: &str, max_connections: usize) -> Result<Pool, BrokerError> {
    let manager = Manager::new(url, ConnectionProperties::default());

    let pool = Pool::builder(manager)
        .max_size(max_connections)
        .build()
        .map_err(|e| BrokerError::Pool(e.to_string()))?;

    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match pool.get().await {
            Ok(_) => {
                tracing::info!("📡 broker connected");
                return Ok(pool);
            }
            Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
                tracing::warn!(
                    attempt,
                    max = MAX_CONNECT_ATTEMPTS,
                    error = %e,
                    "broker not ready, retrying in {}s...",
                    CONNECT_RETRY_INTERVAL.as_secs()
                );
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
            Err(e) => {
                return Err(BrokerError::Connection(format!(
                    "failed after {MAX_CONNECT_ATTEMPTS} attempts: {e}"
                )));
            }
        }
    }

    unreachable!()
}
