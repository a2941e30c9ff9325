mod queue;
mod lease;
mod worker;

pub use queue::TaskQueue;
pub use worker::run_worker;
pub use lease::{ElectionState, LeaderElector};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Back-off policy of a task queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Rate-limited requeues allowed per item; 0 retries forever.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            max_retries: 0,
        }
    }
}

impl QueueConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before the `attempt`-th retry (0-based): base doubled per attempt, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(32));
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    pub lease_name: String,
    pub namespace: String,
    pub identity: String,
    pub lease_duration_ms: u64,
    pub renew_deadline_ms: u64,
    pub retry_period_ms: u64,
}

impl LeaseConfig {
    pub fn new(lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration_ms: 15_000,
            renew_deadline_ms: 10_000,
            retry_period_ms: 2_000,
        }
    }
}

pub type Result<T> = std::result::Result<T, ElectionError>;

#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    #[error("Store error: {0}")]
    Store(#[from] apis::StoreError),

    #[error("Lease {0} lost")]
    LeaseLost(String),
}
