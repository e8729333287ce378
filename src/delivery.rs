use lapin::types::{AMQPValue, FieldTable};

// ── Wire headers ───────────────────────────────────────────────────────────────
// Both headers must survive broker-side dead-lettering verbatim; the attempt
// counter carried in DELAY_COUNT_HEADER is the only retry state that exists.

/// Seconds the message is expected to sit in its current delay queue.
/// Also the header-match binding key of every delay queue.
pub const DELAY_HEADER: &str = "backoff-delay";

/// Number of retry attempts already scheduled for this logical message.
/// Absent means the message has never been retried.
pub const DELAY_COUNT_HEADER: &str = "backoff-delay-count";

// ── Delivery ───────────────────────────────────────────────────────────────────

/// One message received from the broker, decoupled from the transport types.
///
/// Lives for the duration of a single dispatch. Exactly one terminal action
/// (ack, nack, or ack plus republish) is applied to its `delivery_tag`, after
/// which the value must not be reused.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub routing_key: String,
    /// Opaque broker handle used for ack/nack on the originating channel.
    pub delivery_tag: u64,
    pub message_id: Option<String>,
    /// Broker timestamp of the incoming message, if stamped.
    pub timestamp: Option<u64>,
    pub content_type: Option<String>,
    pub headers: FieldTable,
    pub payload: Vec<u8>,
}

impl Delivery {
    /// Retry attempts already scheduled for this logical message.
    ///
    /// Read from [`DELAY_COUNT_HEADER`]; a missing header or header table
    /// means the message has never been through the retry exchange.
    /// Monotonically non-decreasing across redeliveries: every reschedule
    /// republishes with the incremented value.
    pub fn attempt_count(&self) -> u32 {
        header_u32(&self.headers, DELAY_COUNT_HEADER).unwrap_or(0)
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        let properties = &delivery.properties;
        Self {
            routing_key: delivery.routing_key.to_string(),
            delivery_tag: delivery.delivery_tag,
            message_id: properties.message_id().as_ref().map(|id| id.to_string()),
            timestamp: *properties.timestamp(),
            content_type: properties.content_type().as_ref().map(|ct| ct.to_string()),
            headers: properties.headers().clone().unwrap_or_default(),
            payload: delivery.data,
        }
    }
}

// ── Header extraction ──────────────────────────────────────────────────────────

/// Read an integer header, accepting any AMQP integer width.
///
/// Publishers are not consistent about the width they stamp: our own
/// republish writes `LongInt`, but a message that crossed another client
/// first may carry any of the signed widths. Negative values are treated
/// as absent.
pub(crate) fn header_u32(headers: &FieldTable, name: &str) -> Option<u32> {
    let raw = match headers.inner().get(name)? {
        AMQPValue::ShortShortInt(n) => i64::from(*n),
        AMQPValue::ShortInt(n) => i64::from(*n),
        AMQPValue::LongInt(n) => i64::from(*n),
        AMQPValue::LongLongInt(n) => *n,
        _ => return None,
    };
    u32::try_from(raw).ok()
}
