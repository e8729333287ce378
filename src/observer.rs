use crate::consumer::HandlerError;
use crate::delivery::Delivery;

/// Notified on every failure path: non-retryable, exhausted, and also when
/// a retry was scheduled. Implementations must not assume the failure was
/// terminal; check the attempt counter on the delivery if it matters.
///
/// Observers run after the terminal or rescheduling broker action and must
/// not block; hand long work off to a task.
pub trait FailureObserver: Send + Sync {
    fn notify(&self, delivery: &Delivery, error: &HandlerError);
}

/// Default observer: reports every failure through `tracing`.
pub struct LogObserver;

impl FailureObserver for LogObserver {
    fn notify(&self, delivery: &Delivery, error: &HandlerError) {
        tracing::error!(
            message_id = ?delivery.message_id,
            routing_key = %delivery.routing_key,
            kind = %error.kind(),
            attempts = delivery.attempt_count(),
            "message failed: {}",
            error.message()
        );
    }
}
