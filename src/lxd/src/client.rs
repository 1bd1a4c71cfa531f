//! The hypervisor seam used by the CRI services.

use std::collections::HashMap;

use async_trait::async_trait;

use lxdlet_core::Result;

use crate::api::{ContainerInfo, ContainerRuntimeState, ImageInfo, ServerInfo};

/// A container creation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewContainer {
    /// Hypervisor container name.
    pub name: String,
    /// Image alias the container is created from.
    pub image: String,
    /// Container config keys (`user.*` metadata).
    pub config: HashMap<String, String>,
}

/// Operations lxdlet needs from the container hypervisor.
///
/// Every call is a single request to the daemon. Calls taking `wait` block
/// until the daemon-side background operation has finished and report its
/// failure; nothing is retried.
#[async_trait]
pub trait HypervisorClient: Send + Sync {
    async fn server_info(&self) -> Result<ServerInfo>;

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>>;

    /// Fails with `NotFound` when no such container exists.
    async fn get_container(&self, name: &str) -> Result<ContainerInfo>;

    async fn container_state(&self, name: &str) -> Result<ContainerRuntimeState>;

    async fn create_container(&self, request: &NewContainer, wait: bool) -> Result<()>;

    async fn start_container(&self, name: &str, wait: bool) -> Result<()>;

    /// Forced stop, no graceful timeout.
    async fn stop_container(&self, name: &str, wait: bool) -> Result<()>;

    async fn delete_container(&self, name: &str, wait: bool) -> Result<()>;

    async fn list_images(&self) -> Result<Vec<ImageInfo>>;

    /// Resolve a local alias to its image. Fails with `NotFound` for unknown aliases.
    async fn get_image(&self, alias: &str) -> Result<ImageInfo>;

    /// Copy an image from the configured remote and register `alias` locally.
    async fn pull_image(&self, alias: &str, wait: bool) -> Result<()>;

    async fn delete_image(&self, alias: &str, wait: bool) -> Result<()>;
}
