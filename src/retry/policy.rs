use std::collections::HashSet;

use crate::consumer::ErrorKind;

/// Retry budget applied when a consumer opts in without overriding it.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

// ── RetryOn ────────────────────────────────────────────────────────────────────

/// Membership test deciding which failure kinds are worth rescheduling.
#[derive(Debug, Clone)]
pub enum RetryOn {
    /// Every handler failure is retryable. The default.
    Any,
    /// Only the listed kinds are retryable; everything else finalizes
    /// immediately.
    Kinds(HashSet<ErrorKind>),
}

impl RetryOn {
    /// Build the `Kinds` variant from any iterable of kinds.
    pub fn kinds<I>(kinds: I) -> Self
    where
        I: IntoIterator<Item = ErrorKind>,
    {
        Self::Kinds(kinds.into_iter().collect())
    }

    pub fn matches(&self, kind: ErrorKind) -> bool {
        match self {
            Self::Any => true,
            Self::Kinds(set) => set.contains(&kind),
        }
    }
}

impl Default for RetryOn {
    fn default() -> Self {
        Self::Any
    }
}

// ── RetryPolicy ────────────────────────────────────────────────────────────────

/// Per-consumer-type retry configuration.
///
/// Constructed through [`RetryPolicy::builder`] at registration time and
/// immutable afterwards. Both the delay-queue names and their TTLs derive
/// from [`RetryPolicy::backoff`], so the policy a consumer was registered
/// with must never change while its topology exists on the broker.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_on: RetryOn,
    exchange_name: Option<String>,
    exchange_durable: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_on: RetryOn::Any,
            exchange_name: None,
            exchange_durable: true,
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Upper bound on scheduled retries. A message whose attempt counter has
    /// reached this value is exhausted.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether a failure of `kind` should be rescheduled.
    pub fn retries(&self, kind: ErrorKind) -> bool {
        self.retry_on.matches(kind)
    }

    /// Delay in seconds before the given attempt is redelivered.
    ///
    /// `(attempt + 1)^4 + 30 + (attempt + 2)`, so the ladder starts at 33 s
    /// and roughly quadruples the wait every two attempts: 33, 49, 115,
    /// 291, 661, ... The formula is fixed: queue names and TTLs on the
    /// broker are derived from it, and a drifting formula would strand
    /// already-declared queues.
    pub fn backoff(&self, attempt: u32) -> u64 {
        let n = u64::from(attempt);
        (n + 1).pow(4) + 30 + (n + 2)
    }

    /// Name of the retry exchange for a consumer reading `queue_name`.
    /// Defaults to `"<queue_name>.retry"` unless overridden.
    pub fn exchange_name(&self, queue_name: &str) -> String {
        self.exchange_name
            .clone()
            .unwrap_or_else(|| format!("{queue_name}.retry"))
    }

    /// Durability of the retry exchange and of every delay queue.
    pub fn exchange_durable(&self) -> bool {
        self.exchange_durable
    }
}

// ── Builder ────────────────────────────────────────────────────────────────────

/// Registration-time configuration surface for [`RetryPolicy`].
///
/// Consumed by [`build`](RetryPolicyBuilder::build); there is no way to
/// mutate a policy after it has been handed to the worker.
#[derive(Debug)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn retry_on(mut self, retry_on: RetryOn) -> Self {
        self.policy.retry_on = retry_on;
        self
    }

    /// Override the default `"<queue>.retry"` exchange name.
    pub fn retry_exchange_name(mut self, name: impl Into<String>) -> Self {
        self.policy.exchange_name = Some(name.into());
        self
    }

    pub fn retry_exchange_durable(mut self, durable: bool) -> Self {
        self.policy.exchange_durable = durable;
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}
