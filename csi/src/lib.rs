//! Volume plugin: the CSI Identity, Controller and Node gRPC services that
//! let a container orchestrator provision, attach and mount local volumes.

mod auth;
mod controller;
mod error;
pub mod grpc;
mod group;
mod mounter;
mod node;
pub mod params;
mod plugin;
mod server;
pub mod types;

pub use auth::{extract_auth_info, AuthContext, AuthInterceptor, ACCESS_ID_HEADER, SECRET_KEY_HEADER};
pub use error::{Code, CsiError, CsiResult};
pub use mounter::{HostMounter, Mounter, DEFAULT_FS_TYPE};
pub use params::VolumeParameters;
pub use plugin::{Config, Controller, Endpoint, Identity, Node, Plugin, DEFAULT_ADDRESS};
pub use server::{bind_unix, Server};
