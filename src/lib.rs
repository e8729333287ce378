//! RabbitMQ consumer framework with exponential-backoff retry.
//!
//! Failed deliveries are rerouted through a ladder of time-delayed queues
//! instead of being lost or instantly redelivered: each delay queue holds
//! a rescheduled copy for its TTL and then dead-letters it back onto the
//! main exchange, so the message reappears on the consumer's queue after
//! an increasing delay, up to a bounded number of attempts. The attempt
//! counter travels in message headers; no retry state is held in-process.
//!
//! A consumer opts in by returning a [`RetryPolicy`] from its
//! registration:
//!
//! ```no_run
//! use async_trait::async_trait;
//! use redeliver::{Consumer, Context, ErrorKind, HandlerError, RetryOn, RetryPolicy};
//!
//! const UPSTREAM_DOWN: ErrorKind = ErrorKind::new("upstream-down");
//!
//! struct OrderMailer {
//!     policy: RetryPolicy,
//! }
//!
//! impl OrderMailer {
//!     fn new() -> Self {
//!         let policy = RetryPolicy::builder()
//!             .max_retries(3)
//!             .retry_on(RetryOn::kinds([UPSTREAM_DOWN]))
//!             .build();
//!         Self { policy }
//!     }
//! }
//!
//! #[async_trait]
//! impl Consumer for OrderMailer {
//!     type Message = serde_json::Value;
//!
//!     fn queue_name(&self) -> &str {
//!         "order_mailer"
//!     }
//!
//!     fn routing_keys(&self) -> Vec<String> {
//!         vec!["orders.created".to_string()]
//!     }
//!
//!     fn retry_policy(&self) -> Option<RetryPolicy> {
//!         Some(self.policy.clone())
//!     }
//!
//!     async fn handle(&self, _ctx: &Context<'_>, _message: Self::Message) -> Result<(), HandlerError> {
//!         Err(HandlerError::new(UPSTREAM_DOWN, "smtp relay unreachable"))
//!     }
//! }
//! ```

pub mod broker;
pub mod config;
pub mod consumer;
pub mod delivery;
pub mod dispatch;
pub mod metrics;
pub mod observer;
pub mod retry;
pub mod shutdown;
pub mod worker;

pub use broker::{build_pool, AmqpChannel, BrokerChannel, BrokerError, Pool, Publication};
pub use config::{Config, ConfigError};
pub use consumer::{Consumer, Context, ErrorKind, HandlerError};
pub use delivery::{Delivery, DELAY_COUNT_HEADER, DELAY_HEADER};
pub use dispatch::{Dispatcher, SetupError};
pub use metrics::{Metrics, MetricsSnapshot};
pub use observer::{FailureObserver, LogObserver};
pub use retry::{
    RetryOn, RetryOutcome, RetryPolicy, RetryPolicyBuilder, RetryRouter, RetryTopology,
    DEFAULT_MAX_RETRIES,
};
pub use shutdown::{new_pair, wait_for_os_signal, ShutdownHandle, ShutdownSignal};
pub use worker::{Worker, WorkerError};
