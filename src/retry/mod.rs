mod policy;
mod router;
mod topology;

pub use policy::{RetryOn, RetryPolicy, RetryPolicyBuilder, DEFAULT_MAX_RETRIES};
pub use router::{RetryOutcome, RetryRouter};
pub use topology::RetryTopology;
