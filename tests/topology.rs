//! Backoff-ladder declaration against the recorded broker seam.

mod common;

use lapin::{
    types::{AMQPValue, FieldTable},
    ExchangeKind,
};

use common::{BrokerOp, RecordingChannel};
use redeliver::{RetryPolicy, RetryTopology, DELAY_HEADER};

fn expected_queue_args(main_exchange: &str, ttl_ms: i32) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(main_exchange.as_bytes().to_vec().into()),
    );
    args.insert("x-message-ttl".into(), AMQPValue::LongInt(ttl_ms));
    args
}

fn expected_bind_args(delay: i32) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(DELAY_HEADER.into(), AMQPValue::LongInt(delay));
    args.insert(
        "x-match".into(),
        AMQPValue::LongString("all".as_bytes().to_vec().into()),
    );
    args
}

#[tokio::test]
async fn declares_one_queue_per_attempt_with_derived_ttls() {
    common::init_tracing();
    let channel = RecordingChannel::new();
    let policy = RetryPolicy::builder().max_retries(5).build();
    let topology = RetryTopology::new(policy, "orders", "main");

    topology.declare(&channel).await.unwrap();

    let queues = channel.queue_declarations();
    assert_eq!(queues.len(), 5);

    let expected = [(33u64, 33_000), (49, 49_000), (115, 115_000), (291, 291_000), (661, 661_000)];
    for (op, (delay, ttl_ms)) in queues.iter().zip(expected) {
        match op {
            BrokerOp::QueueDeclared { name, durable, args } => {
                assert_eq!(name, &format!("orders.retry.{delay}"));
                assert!(durable);
                assert_eq!(args, &expected_queue_args("main", ttl_ms));
            }
            other => panic!("expected queue declaration, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn binds_each_queue_on_its_delay_header() {
    let channel = RecordingChannel::new();
    let policy = RetryPolicy::builder().max_retries(2).build();
    let topology = RetryTopology::new(policy, "orders", "main");

    topology.declare(&channel).await.unwrap();

    let bindings: Vec<_> = channel
        .ops()
        .into_iter()
        .filter(|op| matches!(op, BrokerOp::QueueBound { .. }))
        .collect();
    assert_eq!(bindings.len(), 2);

    for (op, delay) in bindings.iter().zip([33i32, 49]) {
        match op {
            BrokerOp::QueueBound {
                queue,
                exchange,
                routing_key,
                args,
            } => {
                assert_eq!(queue, &format!("orders.retry.{delay}"));
                assert_eq!(exchange, "orders.retry");
                assert_eq!(routing_key, "");
                assert_eq!(args, &expected_bind_args(delay));
            }
            other => panic!("expected binding, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn declares_a_durable_headers_exchange() {
    let channel = RecordingChannel::new();
    let topology = RetryTopology::new(RetryPolicy::default(), "orders", "main");

    topology.declare(&channel).await.unwrap();

    match &channel.exchange_declarations()[..] {
        [BrokerOp::ExchangeDeclared { name, kind, durable }] => {
            assert_eq!(name, "orders.retry");
            assert_eq!(*kind, ExchangeKind::Headers);
            assert!(durable);
        }
        other => panic!("expected exactly one exchange declaration, got {other:?}"),
    }
}

#[tokio::test]
async fn exchange_declaration_is_memoized_across_calls() {
    let channel = RecordingChannel::new();
    let policy = RetryPolicy::builder().max_retries(5).build();
    let topology = RetryTopology::new(policy, "orders", "main");

    topology.declare(&channel).await.unwrap();
    topology.declare(&channel).await.unwrap();

    // The broker treats identical queue redeclarations as no-ops, so only
    // the exchange is guarded in-process.
    assert_eq!(channel.exchange_declarations().len(), 1);
    assert_eq!(channel.queue_declarations().len(), 10);
}

#[tokio::test]
async fn non_durable_policy_applies_to_exchange_and_queues() {
    let channel = RecordingChannel::new();
    let policy = RetryPolicy::builder()
        .max_retries(1)
        .retry_exchange_durable(false)
        .build();
    let topology = RetryTopology::new(policy, "orders", "main");

    topology.declare(&channel).await.unwrap();

    for op in channel.ops() {
        match op {
            BrokerOp::ExchangeDeclared { durable, .. } => assert!(!durable),
            BrokerOp::QueueDeclared { durable, .. } => assert!(!durable),
            _ => {}
        }
    }
}

#[tokio::test]
async fn single_queue_declaration_matches_its_delay() {
    let channel = RecordingChannel::new();
    let policy = RetryPolicy::builder().retry_exchange_name("x.retry").build();
    let topology = RetryTopology::new(policy, "ignored", "main");

    topology.create_retry_queue(&channel, 33).await.unwrap();

    let ops = channel.ops();
    assert_eq!(ops.len(), 2);

    match &ops[0] {
        BrokerOp::QueueDeclared { name, durable, args } => {
            assert_eq!(name, "x.retry.33");
            assert!(durable);
            assert_eq!(args, &expected_queue_args("main", 33_000));
        }
        other => panic!("expected queue declaration, got {other:?}"),
    }

    match &ops[1] {
        BrokerOp::QueueBound { queue, exchange, args, .. } => {
            assert_eq!(queue, "x.retry.33");
            assert_eq!(exchange, "x.retry");
            assert_eq!(args, &expected_bind_args(33));
        }
        other => panic!("expected binding, got {other:?}"),
    }
}
