mod env;
mod annotation;
mod quantity;
mod exec;
mod host;

pub use env::{AuthConfig, Environment};
pub use annotation::{LocalStorageConfig, NodeAnnotationConfig, NODE_CONFIG_ANNOTATION};
pub use quantity::{format_bytes, parse_bytes};
pub use exec::{CommandOutput, CommandRunner, HostCommandRunner};
pub use host::{host_check, required_tools};

pub type Result<T> = std::result::Result<T, SystemError>;

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("Host requirements not met: {0}")]
    HostError(String),

    #[error("Invalid environment: {0}")]
    Environment(String),

    #[error("Invalid node configuration: {0}")]
    NodeConfig(String),

    #[error("Invalid quantity: {0}")]
    Quantity(String),

    #[error("Command `{command}` failed with exit code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
