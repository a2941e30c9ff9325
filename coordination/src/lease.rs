use apis::{Api, Lease, LeaseSpec, ObjectMeta, RecordStore};
use chrono::Utc;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::{ElectionError, LeaseConfig, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Follower,
    Candidate,
    Leader,
}

/// Holds a named lease record for as long as its owner keeps renewing it.
pub struct LeaderElector {
    config: LeaseConfig,
    leases: Api<Lease>,
    state: Arc<RwLock<ElectionState>>,
    leader: Arc<RwLock<Option<String>>>,
}

impl LeaderElector {
    pub fn new(store: Arc<dyn RecordStore>, config: LeaseConfig) -> Self {
        let leases = Api::namespaced(store, &config.namespace);
        Self {
            config,
            leases,
            state: Arc::new(RwLock::new(ElectionState::Follower)),
            leader: Arc::new(RwLock::new(None)),
        }
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    pub async fn state(&self) -> ElectionState {
        *self.state.read().await
    }

    pub async fn is_leader(&self) -> bool {
        matches!(*self.state.read().await, ElectionState::Leader)
    }

    pub async fn current_leader(&self) -> Option<String> {
        self.leader.read().await.clone()
    }

    /// Waits for the lease, then drives `work` while renewing it. Losing the
    /// lease aborts `work` and is reported as an error.
    pub async fn run_with_lease<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.acquire().await?;

        tokio::select! {
            result = self.renew_loop() => {
                error!("Lost lease {}: {:?}", self.config.lease_name, result);
                *self.state.write().await = ElectionState::Follower;
                result
            }
            _ = work => {
                debug!("Leader work for {} finished", self.config.lease_name);
                Ok(())
            }
        }
    }

    async fn acquire(&self) -> Result<()> {
        *self.state.write().await = ElectionState::Candidate;
        info!(
            "{} campaigning for lease {}/{}",
            self.config.identity, self.config.namespace, self.config.lease_name
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!("{} became leader of {}", self.config.identity, self.config.lease_name);
                    *self.state.write().await = ElectionState::Leader;
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => debug!("Failed to acquire lease {}: {}", self.config.lease_name, e),
            }
            tokio::time::sleep(self.jittered_retry_period()).await;
        }
    }

    async fn renew_loop(&self) -> Result<()> {
        let retry = Duration::from_millis(self.config.retry_period_ms);
        let deadline = Duration::from_millis(self.config.renew_deadline_ms);
        let mut last_renewal = Instant::now();

        loop {
            tokio::time::sleep(retry).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => last_renewal = Instant::now(),
                Ok(false) => {
                    return Err(ElectionError::LeaseLost(self.config.lease_name.clone()));
                }
                Err(e) => {
                    debug!("Failed to renew lease {}: {}", self.config.lease_name, e);
                    if last_renewal.elapsed() > deadline {
                        return Err(ElectionError::LeaseLost(self.config.lease_name.clone()));
                    }
                }
            }
        }
    }

    /// One acquisition attempt: takes the lease when it is free, expired, or
    /// already ours. Returns whether we hold it afterwards.
    pub async fn try_acquire_or_renew(&self) -> Result<bool> {
        let now = Utc::now();
        let duration_seconds = (self.config.lease_duration_ms / 1000).max(1) as i64;

        let Some(mut lease) = self.leases.get_opt(&self.config.lease_name).await? else {
            let lease = Lease {
                metadata: ObjectMeta::namespaced(&self.config.namespace, &self.config.lease_name),
                spec: LeaseSpec {
                    holder_identity: self.config.identity.clone(),
                    lease_duration_seconds: duration_seconds,
                    acquire_time: Some(now),
                    renew_time: Some(now),
                    lease_transitions: 0,
                },
            };
            return match self.leases.create(&lease).await {
                Ok(_) => {
                    *self.leader.write().await = Some(self.config.identity.clone());
                    Ok(true)
                }
                Err(e) if e.is_already_exists() => Ok(false),
                Err(e) => Err(e.into()),
            };
        };

        let holder = lease.spec.holder_identity.clone();
        if !holder.is_empty() && holder != self.config.identity && !lease.is_expired(now) {
            *self.leader.write().await = Some(holder);
            return Ok(false);
        }

        if holder != self.config.identity {
            lease.spec.holder_identity = self.config.identity.clone();
            lease.spec.acquire_time = Some(now);
            lease.spec.lease_transitions += 1;
        }
        lease.spec.lease_duration_seconds = duration_seconds;
        lease.spec.renew_time = Some(now);

        match self.leases.update(&lease).await {
            Ok(_) => {
                *self.leader.write().await = Some(self.config.identity.clone());
                Ok(true)
            }
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Gives the lease up so another candidate can take it immediately.
    pub async fn release(&self) -> Result<()> {
        if let Some(mut lease) = self.leases.get_opt(&self.config.lease_name).await? {
            if lease.spec.holder_identity == self.config.identity {
                lease.spec.holder_identity.clear();
                lease.spec.renew_time = None;
                self.leases.update(&lease).await?;
            }
        }
        *self.state.write().await = ElectionState::Follower;
        Ok(())
    }

    fn jittered_retry_period(&self) -> Duration {
        let base = self.config.retry_period_ms.max(1);
        let jitter = rand::thread_rng().gen_range(0..=base / 5);
        Duration::from_millis(base + jitter)
    }
}
