use std::fmt;

use async_trait::async_trait;
use lapin::types::FieldTable;
use serde::de::DeserializeOwned;

use crate::broker::BrokerChannel;
use crate::delivery::Delivery;
use crate::retry::RetryPolicy;

// ── ErrorKind ──────────────────────────────────────────────────────────────────

/// Identity of a failure class, used by the retry classification.
///
/// Kinds are declared as constants by the consumer crate and compared by
/// name, which keeps the retryable set a finite, closed enumeration rather
/// than an open-ended type test.
///
/// ```
/// use redeliver::ErrorKind;
///
/// const UPSTREAM_TIMEOUT: ErrorKind = ErrorKind::new("upstream-timeout");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorKind(&'static str);

impl ErrorKind {
    /// Kind attached to payloads the consumer's `decode` rejected.
    pub const DECODE: ErrorKind = ErrorKind("payload-decode");

    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

// ── HandlerError ───────────────────────────────────────────────────────────────

/// Failure raised by a consumer handler (or by payload decoding).
///
/// Carries the [`ErrorKind`] the retry classification matches against.
#[derive(Debug)]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HandlerError {}

// ── Context ────────────────────────────────────────────────────────────────────

/// Handler-side view of the in-flight delivery.
///
/// Borrowed for the duration of one `handle` call; handlers that need to
/// publish follow-up messages do so through [`Context::channel`].
pub struct Context<'a> {
    channel: &'a dyn BrokerChannel,
    delivery: &'a Delivery,
}

impl<'a> Context<'a> {
    pub(crate) fn new(channel: &'a dyn BrokerChannel, delivery: &'a Delivery) -> Self {
        Self { channel, delivery }
    }

    pub fn channel(&self) -> &dyn BrokerChannel {
        self.channel
    }

    pub fn routing_key(&self) -> &str {
        &self.delivery.routing_key
    }

    pub fn message_id(&self) -> Option<&str> {
        self.delivery.message_id.as_deref()
    }

    pub fn headers(&self) -> &FieldTable {
        &self.delivery.headers
    }

    /// Retry attempts already scheduled for this message. 0 on first delivery.
    pub fn attempt_count(&self) -> u32 {
        self.delivery.attempt_count()
    }
}

// ── Consumer ───────────────────────────────────────────────────────────────────

/// A consumer type: one queue, a set of routing keys, and a handler.
///
/// Registered once with [`crate::worker::Worker`] at startup. All
/// configuration returned here is read during registration and treated as
/// immutable afterwards; in particular the [`RetryPolicy`] is snapshotted
/// before the retry topology is declared.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Decoded message type. The default `decode` expects JSON.
    type Message: DeserializeOwned + Send;

    fn queue_name(&self) -> &str;

    /// Routing keys bound from the main exchange to this consumer's queue.
    fn routing_keys(&self) -> Vec<String>;

    fn queue_durable(&self) -> bool {
        true
    }

    /// Return a policy to opt into retry capability.
    ///
    /// `None` (the default) finalizes every failure immediately with a
    /// negative acknowledgement. Implementations that opt in should build
    /// the policy once and return a clone of the stored value.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    /// Whether the payload is binary. Affects only the pre-dispatch debug
    /// log, which prints byte counts instead of payload text.
    fn payload_binary(&self) -> bool {
        false
    }

    /// Decode the raw payload into [`Self::Message`].
    ///
    /// Override to use a serializer other than JSON. Failures flow through
    /// the same classification as handler failures, carrying
    /// [`ErrorKind::DECODE`].
    fn decode(&self, payload: &[u8]) -> Result<Self::Message, HandlerError> {
        serde_json::from_slice(payload)
            .map_err(|e| HandlerError::new(ErrorKind::DECODE, format!("payload decode failed: {e}")))
    }

    /// Process one decoded message. Invoked exactly once per delivery.
    async fn handle(&self, ctx: &Context<'_>, message: Self::Message) -> Result<(), HandlerError>;
}
