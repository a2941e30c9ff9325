use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::net::{TcpListener, UnixListener};
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tonic::transport::server::Router;

use crate::auth::AuthInterceptor;
use crate::grpc::pb::controller_server::ControllerServer;
use crate::grpc::pb::identity_server::IdentityServer;
use crate::grpc::pb::node_server::NodeServer;
use crate::grpc::{ControllerService, IdentityService, NodeService};
use crate::plugin::{Endpoint, Plugin};
use crate::{CsiError, CsiResult};

/// Serves the Identity, Controller and Node gRPC services of one plugin.
pub struct Server {
    plugin: Arc<Plugin>,
}

impl Server {
    pub fn new(plugin: Arc<Plugin>) -> Self {
        Self { plugin }
    }

    fn router(&self) -> Router {
        let auth = AuthInterceptor::new(self.plugin.config().auth.clone());
        tonic::transport::Server::builder()
            .trace_fn(|req| tracing::debug_span!("csi", method = %req.uri().path()))
            .add_service(IdentityServer::with_interceptor(
                IdentityService(self.plugin.clone()),
                auth.clone(),
            ))
            .add_service(ControllerServer::with_interceptor(
                ControllerService(self.plugin.clone()),
                auth.clone(),
            ))
            .add_service(NodeServer::with_interceptor(NodeService(self.plugin.clone()), auth))
    }

    /// Listens on the configured endpoint until `shutdown` resolves.
    pub async fn start(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> CsiResult<()> {
        match self.plugin.config().endpoint()? {
            Endpoint::Unix(path) => {
                let listener = bind_unix(&path)?;
                self.serve_unix(listener, shutdown).await
            }
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(&addr)
                    .await
                    .map_err(|e| CsiError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;
                self.serve(listener, shutdown).await
            }
        }
    }

    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> CsiResult<()> {
        let addr = listener
            .local_addr()
            .map_err(|e| CsiError::Internal(format!("Listener error: {}", e)))?;
        tracing::info!("Starting volume plugin server on tcp://{}", addr);

        self.router()
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await
            .map_err(|e| CsiError::Internal(format!("Server error: {}", e)))
    }

    pub async fn serve_unix(
        &self,
        listener: UnixListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> CsiResult<()> {
        let addr = listener
            .local_addr()
            .map_err(|e| CsiError::Internal(format!("Listener error: {}", e)))?;
        tracing::info!("Starting volume plugin server on unix://{:?}", addr.as_pathname());

        self.router()
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
            .await
            .map_err(|e| CsiError::Internal(format!("Server error: {}", e)))
    }
}

/// Binds the socket, replacing one left behind by an earlier run.
pub fn bind_unix(path: &Path) -> CsiResult<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(socket = %path.display(), "Removed stale plugin socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(CsiError::Internal(format!(
                "Failed to remove socket {}: {}",
                path.display(),
                e
            )))
        }
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| CsiError::Internal(format!("Failed to create {}: {}", dir.display(), e)))?;
    }
    UnixListener::bind(path).map_err(|e| CsiError::Internal(format!("Failed to bind to {}: {}", path.display(), e)))
}
