pub mod config;
pub mod node;
pub mod error;

pub use config::{Config, Role};
pub use node::Node;
pub use error::{LocalStorageError, Result};

// Re-export key types from workspace crates
pub use apis;
pub use coordination;
pub use system;
pub use scheduler;
pub use volumegroup;
pub use diskmonitor;
pub use agent;
pub use controller;
pub use csi;
pub use dataset;
