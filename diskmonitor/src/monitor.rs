use coordination::TaskQueue;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::event::{DiskEvent, EventSplitter};
use crate::{Config, MonitorError, Result};

/// Streams block-device uevents from `udevadm` into a task queue, restarting
/// the subprocess whenever its output ends or fails.
pub struct UdevMonitor {
    config: Config,
    queue: Arc<TaskQueue<DiskEvent>>,
    child: Mutex<Option<Child>>,
    stopped: AtomicBool,
}

impl UdevMonitor {
    pub fn new(config: Config, queue: Arc<TaskQueue<DiskEvent>>) -> Self {
        Self {
            config,
            queue,
            child: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!("Starting udev monitor: {} {}", self.config.program, self.config.args.join(" "));

        while !self.stopped.load(Ordering::SeqCst) {
            match self.watch().await {
                Ok(()) => warn!("udev monitor output ended"),
                Err(e) => error!("udev monitor failed: {}", e),
            }
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(self.config.restart_delay_ms)).await;
            info!("Restarting udev monitor");
        }
        Ok(())
    }

    async fn watch(&self) -> Result<()> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MonitorError::Process("monitor has no stdout".to_string()))?;
        {
            let mut slot = self.child.lock().await;
            *slot = Some(child);
            // stop() may have run before the child was stored
            if self.stopped.load(Ordering::SeqCst) {
                if let Some(mut child) = slot.take() {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill udev monitor: {}", e);
                    }
                }
                return Ok(());
            }
        }

        let mut lines = BufReader::new(stdout).lines();
        let mut splitter = EventSplitter::default();
        while let Some(line) = lines.next_line().await? {
            if let Some(event) = splitter.push(&line) {
                debug!(
                    "Disk event {} {} seq={}",
                    event.action, event.dev_name, event.seq_num
                );
                self.queue.add(event);
            }
        }

        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.wait().await;
        }
        Ok(())
    }

    /// Kills the subprocess and stops restarting it.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill udev monitor: {}", e);
            }
        }
    }
}
