//! Shared test fixtures: a recording implementation of the broker seam.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use lapin::{types::FieldTable, ExchangeKind};

use redeliver::{BrokerChannel, BrokerError, Delivery, Publication};

/// Install a subscriber so `RUST_LOG=debug cargo test` shows dispatch
/// logs. Safe to call from every test; only the first call wins.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One broker operation as the code under test issued it.
#[derive(Debug, Clone)]
pub enum BrokerOp {
    ExchangeDeclared {
        name: String,
        kind: ExchangeKind,
        durable: bool,
    },
    QueueDeclared {
        name: String,
        durable: bool,
        args: FieldTable,
    },
    QueueBound {
        queue: String,
        exchange: String,
        routing_key: String,
        args: FieldTable,
    },
    Published {
        exchange: String,
        routing_key: String,
        payload: Vec<u8>,
        publication: Publication,
    },
    Acked(u64),
    Nacked(u64),
}

/// Records every operation instead of talking to a broker.
#[derive(Default)]
pub struct RecordingChannel {
    ops: Mutex<Vec<BrokerOp>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<BrokerOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn acks(&self) -> Vec<u64> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                BrokerOp::Acked(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    pub fn nacks(&self) -> Vec<u64> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                BrokerOp::Nacked(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    pub fn exchange_declarations(&self) -> Vec<BrokerOp> {
        self.ops()
            .into_iter()
            .filter(|op| matches!(op, BrokerOp::ExchangeDeclared { .. }))
            .collect()
    }

    pub fn queue_declarations(&self) -> Vec<BrokerOp> {
        self.ops()
            .into_iter()
            .filter(|op| matches!(op, BrokerOp::QueueDeclared { .. }))
            .collect()
    }

    pub fn publishes(&self) -> Vec<BrokerOp> {
        self.ops()
            .into_iter()
            .filter(|op| matches!(op, BrokerOp::Published { .. }))
            .collect()
    }

    fn record(&self, op: BrokerOp) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl BrokerChannel for RecordingChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        self.record(BrokerOp::ExchangeDeclared {
            name: name.to_string(),
            kind,
            durable,
        });
        Ok(())
    }

    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        args: FieldTable,
    ) -> Result<(), BrokerError> {
        self.record(BrokerOp::QueueDeclared {
            name: name.to_string(),
            durable,
            args,
        });
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        args: FieldTable,
    ) -> Result<(), BrokerError> {
        self.record(BrokerOp::QueueBound {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            args,
        });
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        publication: Publication,
    ) -> Result<(), BrokerError> {
        self.record(BrokerOp::Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
            publication,
        });
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.record(BrokerOp::Acked(delivery_tag));
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.record(BrokerOp::Nacked(delivery_tag));
        Ok(())
    }
}

/// Build a delivery the way the subscription loop would.
pub fn delivery(delivery_tag: u64, headers: FieldTable, payload: &[u8]) -> Delivery {
    Delivery {
        routing_key: "orders.created".to_string(),
        delivery_tag,
        message_id: Some("msg-1".to_string()),
        timestamp: None,
        content_type: Some("application/json".to_string()),
        headers,
        payload: payload.to_vec(),
    }
}
