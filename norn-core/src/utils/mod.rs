pub mod logger;
pub mod retry;

pub use retry::{with_retry, BackoffConfig, ExponentialBackoff};
