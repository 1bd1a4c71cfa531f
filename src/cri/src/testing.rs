//! In-memory hypervisor for service tests.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use lxdlet_core::{LxdletError, Result};
use lxdlet_lxd::{
    ContainerInfo, ContainerRuntimeState, HypervisorClient, ImageAlias, ImageInfo,
    NetworkAddress, NetworkInterface, NewContainer, ServerEnvironment, ServerInfo,
};

#[derive(Default)]
struct FakeState {
    containers: BTreeMap<String, ContainerInfo>,
    addresses: HashMap<String, String>,
    images: Vec<ImageInfo>,
    remote_images: HashSet<String>,
    calls: Vec<String>,
    failing: HashSet<&'static str>,
    disconnected: bool,
}

/// Hypervisor double keeping containers and images in memory.
#[derive(Default)]
pub struct FakeHypervisor {
    state: Mutex<FakeState>,
}

impl FakeHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a local image reachable under `alias`.
    pub fn with_image(self, alias: &str, fingerprint: &str, size: u64) -> Self {
        self.state.lock().images.push(ImageInfo {
            fingerprint: fingerprint.to_string(),
            aliases: vec![ImageAlias {
                name: alias.to_string(),
                description: String::new(),
            }],
            size,
            ..Default::default()
        });
        self
    }

    /// Make `alias` available for pulling.
    pub fn with_remote_image(self, alias: &str) -> Self {
        self.state.lock().remote_images.insert(alias.to_string());
        self
    }

    /// Add an existing container.
    pub fn with_container(self, name: &str, status: &str, config: &[(&str, &str)]) -> Self {
        self.state.lock().containers.insert(
            name.to_string(),
            ContainerInfo {
                name: name.to_string(),
                status: status.to_string(),
                created_at: chrono::Utc::now(),
                config: config
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ..Default::default()
            },
        );
        self
    }

    /// Give a container an IPv4 address on its primary interface.
    pub fn with_address(self, name: &str, ip: &str) -> Self {
        self.state
            .lock()
            .addresses
            .insert(name.to_string(), ip.to_string());
        self
    }

    /// Make every call of `operation` fail with a hypervisor error.
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().failing.insert(operation);
    }

    /// Make every call fail as if the socket were unreachable.
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    /// Calls received so far, as `operation name` strings.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.state.lock().containers.get(name).cloned()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state.lock().containers.keys().cloned().collect()
    }

    pub fn has_image(&self, alias: &str) -> bool {
        find_image(&self.state.lock().images, alias).is_some()
    }

    fn record(&self, operation: &'static str, target: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("{} {}", operation, target).trim_end().to_string());
        if state.disconnected {
            return Err(LxdletError::ConnectionError("fake socket closed".to_string()));
        }
        if state.failing.contains(operation) {
            return Err(LxdletError::HypervisorError {
                status_code: 500,
                message: format!("injected {} failure", operation),
            });
        }
        Ok(())
    }

    fn set_status(&self, name: &str, status: &str) -> Result<()> {
        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| LxdletError::NotFound(format!("container {}", name)))?;
        container.status = status.to_string();
        Ok(())
    }
}

fn find_image<'a>(images: &'a [ImageInfo], alias: &str) -> Option<&'a ImageInfo> {
    images
        .iter()
        .find(|image| image.aliases.iter().any(|a| a.name == alias))
}

#[async_trait]
impl HypervisorClient for FakeHypervisor {
    async fn server_info(&self) -> Result<ServerInfo> {
        self.record("server_info", "")?;
        Ok(ServerInfo {
            api_version: "1.0".to_string(),
            environment: ServerEnvironment {
                server_version: "5.21".to_string(),
                server_name: "fake".to_string(),
                storage: "dir".to_string(),
            },
        })
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        self.record("list_containers", "")?;
        Ok(self.state.lock().containers.values().cloned().collect())
    }

    async fn get_container(&self, name: &str) -> Result<ContainerInfo> {
        self.record("get_container", name)?;
        self.container(name)
            .ok_or_else(|| LxdletError::NotFound(format!("container {}", name)))
    }

    async fn container_state(&self, name: &str) -> Result<ContainerRuntimeState> {
        self.record("container_state", name)?;
        let state = self.state.lock();
        let container = state
            .containers
            .get(name)
            .ok_or_else(|| LxdletError::NotFound(format!("container {}", name)))?;

        let network = state.addresses.get(name).map(|ip| {
            HashMap::from([(
                "eth0".to_string(),
                NetworkInterface {
                    addresses: vec![NetworkAddress {
                        family: "inet".to_string(),
                        address: ip.clone(),
                        netmask: "24".to_string(),
                        scope: "global".to_string(),
                    }],
                    state: "up".to_string(),
                    kind: "broadcast".to_string(),
                },
            )])
        });

        Ok(ContainerRuntimeState {
            status: container.status.clone(),
            network,
            ..Default::default()
        })
    }

    async fn create_container(&self, request: &NewContainer, _wait: bool) -> Result<()> {
        self.record("create_container", &request.name)?;
        let mut state = self.state.lock();
        if find_image(&state.images, &request.image).is_none() {
            return Err(LxdletError::NotFound(format!("image alias {}", request.image)));
        }
        if state.containers.contains_key(&request.name) {
            return Err(LxdletError::HypervisorError {
                status_code: 409,
                message: format!("container {} already exists", request.name),
            });
        }
        state.containers.insert(
            request.name.clone(),
            ContainerInfo {
                name: request.name.clone(),
                status: "Stopped".to_string(),
                status_code: 102,
                created_at: chrono::Utc::now(),
                config: request.config.clone(),
            },
        );
        Ok(())
    }

    async fn start_container(&self, name: &str, _wait: bool) -> Result<()> {
        self.record("start_container", name)?;
        self.set_status(name, "Running")
    }

    async fn stop_container(&self, name: &str, _wait: bool) -> Result<()> {
        self.record("stop_container", name)?;
        self.set_status(name, "Stopped")
    }

    async fn delete_container(&self, name: &str, _wait: bool) -> Result<()> {
        self.record("delete_container", name)?;
        self.state
            .lock()
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| LxdletError::NotFound(format!("container {}", name)))
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        self.record("list_images", "")?;
        Ok(self.state.lock().images.clone())
    }

    async fn get_image(&self, alias: &str) -> Result<ImageInfo> {
        self.record("get_image", alias)?;
        find_image(&self.state.lock().images, alias)
            .cloned()
            .ok_or_else(|| LxdletError::NotFound(format!("image alias {}", alias)))
    }

    async fn pull_image(&self, alias: &str, _wait: bool) -> Result<()> {
        self.record("pull_image", alias)?;
        let mut state = self.state.lock();
        if !state.remote_images.contains(alias) {
            return Err(LxdletError::OperationFailed {
                operation: "/1.0/operations/fake".to_string(),
                message: format!("image {} not found on remote", alias),
            });
        }
        if find_image(&state.images, alias).is_none() {
            let fingerprint = format!("sha-{}", alias.replace('/', "-"));
            state.images.push(ImageInfo {
                fingerprint,
                aliases: vec![ImageAlias {
                    name: alias.to_string(),
                    description: String::new(),
                }],
                size: 1024,
                ..Default::default()
            });
        }
        Ok(())
    }

    async fn delete_image(&self, alias: &str, _wait: bool) -> Result<()> {
        self.record("delete_image", alias)?;
        let mut state = self.state.lock();
        let before = state.images.len();
        state
            .images
            .retain(|image| !image.aliases.iter().any(|a| a.name == alias));
        if state.images.len() == before {
            return Err(LxdletError::NotFound(format!("image alias {}", alias)));
        }
        Ok(())
    }
}
