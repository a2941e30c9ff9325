mod event;
mod monitor;

pub use event::{parse_event_block, DiskAction, DiskEvent, EventSplitter};
pub use monitor::UdevMonitor;

use coordination::QueueConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub program: String,
    pub args: Vec<String>,
    pub restart_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            program: "stdbuf".to_string(),
            args: ["-oL", "udevadm", "monitor", "-p", "-k", "-s", "block"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            restart_delay_ms: 1000,
        }
    }
}

/// Back-off of the disk event queue: 1s doubling up to 16s.
pub fn event_queue_config() -> QueueConfig {
    QueueConfig {
        base_delay_ms: 1000,
        max_delay_ms: 16_000,
        max_retries: 0,
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Monitor process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
