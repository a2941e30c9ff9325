use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalStorageError {
    #[error("Store error: {0}")]
    Store(#[from] apis::StoreError),

    #[error("System error: {0}")]
    System(#[from] system::SystemError),

    #[error("Controller error: {0}")]
    Controller(#[from] controller::ControllerError),

    #[error("Agent error: {0}")]
    Agent(#[from] agent::AgentError),

    #[error("Disk monitor error: {0}")]
    Monitor(#[from] diskmonitor::MonitorError),

    #[error("Volume plugin error: {0}")]
    Csi(#[from] csi::CsiError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] dataset::DatasetError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Task error: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, LocalStorageError>;
