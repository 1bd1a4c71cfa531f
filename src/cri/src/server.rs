//! gRPC server setup for CRI services.
//!
//! Listens on a Unix domain socket for CRI RuntimeService and ImageService RPCs.

use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;

use lxdlet_core::AdapterConfig;
use lxdlet_lxd::LxdClient;

use crate::cri_api::image_service_server::ImageServiceServer;
use crate::cri_api::runtime_service_server::RuntimeServiceServer;
use crate::image_service::LxdImageService;
use crate::runtime_service::LxdRuntimeService;
use crate::sandbox::SandboxStore;

/// CRI gRPC server.
pub struct CriServer {
    config: Arc<AdapterConfig>,
}

impl CriServer {
    /// Create a new CRI server.
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Start serving CRI RPCs on the Unix socket.
    pub async fn serve(&self) -> Result<(), Box<dyn std::error::Error>> {
        let sandboxes = Arc::new(SandboxStore::open(&self.config.sandbox_root)?);
        let hypervisor = Arc::new(LxdClient::from_config(&self.config));

        let runtime_service =
            LxdRuntimeService::new(hypervisor.clone(), sandboxes, self.config.clone());
        let image_service = LxdImageService::new(hypervisor, self.config.clone());

        let socket_path = &self.config.listen_socket;
        prepare_socket(socket_path)?;

        let uds = UnixListener::bind(socket_path)?;
        let uds_stream = UnixListenerStream::new(uds);

        tracing::info!(
            socket = %socket_path.display(),
            lxd_socket = %self.config.lxd_socket.display(),
            sandbox_root = %self.config.sandbox_root.display(),
            "CRI server listening"
        );

        Server::builder()
            .add_service(RuntimeServiceServer::new(runtime_service))
            .add_service(ImageServiceServer::new(image_service))
            .serve_with_incoming(uds_stream)
            .await?;

        Ok(())
    }
}

/// Remove a stale socket file and make sure its directory exists.
fn prepare_socket(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
