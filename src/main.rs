use anyhow::Context;
use apis::MemoryStore;
use clap::{Arg, ArgAction, Command};
use local_storage::{Config, Node, Role};
use std::sync::Arc;
use system::Environment;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = Command::new("local-storage")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Node-local volume control plane: controller, node agent and volume plugin")
        .arg(
            Arg::new("node-name")
                .long("node-name")
                .help("Name of this node (defaults to $NODENAME)")
                .required(false)
        )
        .arg(
            Arg::new("namespace")
                .long("namespace")
                .help("Namespace of the system's leases (defaults to $NAMESPACE)")
                .required(false)
        )
        .arg(
            Arg::new("role")
                .long("role")
                .help("Components to run: all, controller, agent, csi or dataset")
                .default_value("all")
        )
        .arg(
            Arg::new("csi-address")
                .long("csi-address")
                .help("Plugin endpoint, unix:///path/csi.sock or tcp://host:port")
                .default_value(csi::DEFAULT_ADDRESS)
        )
        .arg(
            Arg::new("max-ha-volume-count")
                .long("max-ha-volume-count")
                .help("Highest number of replicated volumes in the cluster")
                .value_parser(clap::value_parser!(i32))
                .default_value("1000")
        )
        .arg(
            Arg::new("dataset-leader-election")
                .long("dataset-leader-election")
                .help("Run the dataset manager behind its own lease")
                .action(ArgAction::SetTrue)
        )
        .get_matches();

    let env = Environment::from_env().context("reading environment")?;

    let role: Role = matches
        .get_one::<String>("role")
        .map(String::as_str)
        .unwrap_or("all")
        .parse()?;

    let mut config = Config::new(env, role);
    if let Some(node_name) = matches.get_one::<String>("node-name") {
        config.node_name = node_name.clone();
    }
    if let Some(namespace) = matches.get_one::<String>("namespace") {
        config.namespace = namespace.clone();
    }
    if let Some(address) = matches.get_one::<String>("csi-address") {
        config.csi_address = address.clone();
    }
    if let Some(count) = matches.get_one::<i32>("max-ha-volume-count") {
        config.max_ha_volume_count = *count;
    }
    config.dataset_leader_election = matches.get_flag("dataset-leader-election");

    info!("Starting local storage with {:?}", config);

    if role.runs_agent() {
        system::host_check().context("host check for the node agent")?;
    }

    let store = Arc::new(MemoryStore::new());
    let node = Arc::new(Node::new(config, store)?);

    let runner = node.clone();
    let mut services = tokio::spawn(async move { runner.start().await });

    tokio::select! {
        result = &mut services => {
            return match result.context("local storage services panicked")? {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!("Local storage failed: {}", e);
                    Err(e.into())
                }
            };
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for shutdown signal")?;
            info!("Received shutdown signal");
        }
    }

    node.shutdown().await;
    services
        .await
        .context("local storage services panicked")??;
    Ok(())
}
