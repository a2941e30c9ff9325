use agent::{Executors, NodeAgent};
use apis::{Informer, LocalStorageNode, LocalVolume, RecordStore};
use controller::ControllerManager;
use csi::{HostMounter, Mounter, Plugin, Server};
use dataset::DatasetManager;
use diskmonitor::UdevMonitor;
use scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use system::HostCommandRunner;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use volumegroup::VolumeGroupManager;

use crate::config::Config;
use crate::error::{LocalStorageError, Result};

/// Followers of a lease keep campaigning until aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The components one process runs for its role, sharing a record store.
pub struct Node {
    config: Config,
    store: Arc<dyn RecordStore>,
    controller: Option<Arc<ControllerManager>>,
    agent: Option<Arc<NodeAgent>>,
    monitor: Option<Arc<UdevMonitor>>,
    plugin: Option<Arc<Plugin>>,
    plugin_scheduler: Arc<Scheduler>,
    dataset: Option<Arc<DatasetManager>>,
    stop: watch::Sender<bool>,
}

impl Node {
    /// Builds the components with the host's LVM, DRBD and mount tools.
    pub fn new(config: Config, store: Arc<dyn RecordStore>) -> Result<Self> {
        let agent_config: agent::Config = config.clone().into();
        let executors = Executors::host(
            Arc::new(HostCommandRunner),
            agent_config.drbd.clone(),
            &config.node_name,
        );
        Self::with_backends(config, store, executors, Arc::new(HostMounter::default()))
    }

    pub fn with_backends(
        config: Config,
        store: Arc<dyn RecordStore>,
        executors: Executors,
        mounter: Arc<dyn Mounter>,
    ) -> Result<Self> {
        config.validate()?;
        let role = config.role;
        info!(node = %config.node_name, namespace = %config.namespace, role = %role, "Initializing local storage node");

        let groups = VolumeGroupManager::new(store.clone(), config.clone().into());
        let plugin_scheduler = Arc::new(Scheduler::new(config.clone().into()));

        let controller = role.runs_controller().then(|| {
            ControllerManager::new(
                store.clone(),
                config.clone().into(),
                Arc::new(Scheduler::new(config.clone().into())),
                groups.clone(),
            )
        });

        let (agent, monitor) = if role.runs_agent() {
            let agent = NodeAgent::new(store.clone(), config.clone().into(), executors);
            let monitor = Arc::new(UdevMonitor::new(
                diskmonitor::Config::default(),
                agent.disk_event_queue(),
            ));
            (Some(agent), Some(monitor))
        } else {
            (None, None)
        };

        let plugin = role.runs_csi().then(|| {
            Plugin::new(
                config.clone().into(),
                store.clone(),
                plugin_scheduler.clone(),
                groups.clone(),
                mounter,
            )
        });

        let dataset = role
            .runs_dataset()
            .then(|| DatasetManager::new(store.clone(), config.clone().into()));

        let (stop, _) = watch::channel(false);
        Ok(Self {
            config,
            store,
            controller,
            agent,
            monitor,
            plugin,
            plugin_scheduler,
            dataset,
            stop,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> Option<Arc<ControllerManager>> {
        self.controller.clone()
    }

    pub fn agent(&self) -> Option<Arc<NodeAgent>> {
        self.agent.clone()
    }

    pub fn plugin(&self) -> Option<Arc<Plugin>> {
        self.plugin.clone()
    }

    pub fn dataset(&self) -> Option<Arc<DatasetManager>> {
        self.dataset.clone()
    }

    /// Runs every component until [`shutdown`](Self::shutdown). The first
    /// component to fail stops the others and its error is returned.
    pub async fn start(&self) -> Result<()> {
        info!(role = %self.config.role, "Starting local storage services");
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        if let Some(controller) = self.controller.clone() {
            tasks.spawn(async move { controller.run().await.map_err(LocalStorageError::from) });
        }

        if let Some(agent) = self.agent.clone() {
            tasks.spawn(async move { agent.run().await.map_err(LocalStorageError::from) });
        }
        if let Some(monitor) = self.monitor.clone() {
            tasks.spawn(async move { monitor.run().await.map_err(LocalStorageError::from) });
        }

        if let Some(plugin) = self.plugin.clone() {
            let store = self.store.clone();
            let scheduler = self.plugin_scheduler.clone();
            let stop = self.stop.subscribe();
            tasks.spawn(async move {
                run_scheduler_cache(store, scheduler, stop).await;
                Ok(())
            });

            let mut stop = self.stop.subscribe();
            tasks.spawn(async move {
                let server = Server::new(plugin);
                let shutdown = async move {
                    let _ = stop.wait_for(|stopped| *stopped).await;
                };
                server.start(shutdown).await.map_err(LocalStorageError::from)
            });
        }

        if let Some(dataset) = self.dataset.clone() {
            tasks.spawn(async move { dataset.run().await.map_err(LocalStorageError::from) });
        }

        let mut stop = self.stop.subscribe();
        let mut failure = tokio::select! {
            failure = next_failure(&mut tasks) => failure,
            _ = stop.wait_for(|stopped| *stopped) => None,
        };
        if failure.is_some() {
            self.shutdown().await;
        }

        let drain = async {
            while let Some(e) = next_failure(&mut tasks).await {
                failure.get_or_insert(e);
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Components still running after {:?}, aborting them", SHUTDOWN_GRACE);
            tasks.shutdown().await;
        }

        info!("Local storage services stopped");
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn shutdown(&self) {
        info!("Shutting down local storage services");
        let _ = self.stop.send(true);
        if let Some(controller) = &self.controller {
            controller.shutdown();
        }
        if let Some(monitor) = &self.monitor {
            monitor.stop().await;
        }
        if let Some(agent) = &self.agent {
            agent.shutdown();
        }
        if let Some(dataset) = &self.dataset {
            dataset.shutdown();
        }
    }
}

/// Waits for the next component to fail, or for all of them to finish.
async fn next_failure(tasks: &mut JoinSet<Result<()>>) -> Option<LocalStorageError> {
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined
            .map_err(|e| LocalStorageError::Task(e.to_string()))
            .and_then(|r| r);
        if let Err(e) = outcome {
            error!("Local storage component failed: {}", e);
            return Some(e);
        }
    }
    None
}

/// Keeps the plugin's scheduler view of nodes and volumes current for the
/// node selection done while grouping volumes.
async fn run_scheduler_cache(
    store: Arc<dyn RecordStore>,
    scheduler: Arc<Scheduler>,
    mut stop: watch::Receiver<bool>,
) {
    let nodes = Informer::<LocalStorageNode>::new(store.clone());
    let volumes = Informer::<LocalVolume>::new(store);
    scheduler.register_handlers(&nodes, &volumes);

    let handles = vec![nodes.spawn(), volumes.spawn()];
    nodes.wait_for_sync().await;
    volumes.wait_for_sync().await;
    scheduler.init(&volumes.list().await, &nodes.list().await);

    let _ = stop.wait_for(|stopped| *stopped).await;
    for handle in handles {
        handle.abort();
    }
}
