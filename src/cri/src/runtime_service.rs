//! CRI RuntimeService implementation.
//!
//! Maps CRI pod/container lifecycle onto LXD:
//! - Pod Sandbox → persisted record in the SandboxStore (no LXD resource)
//! - Container → LXD container named `pod-<pod uid prefix>-<name>`

use std::collections::HashMap;
use std::sync::Arc;

use tonic::{Request, Response, Status};

use lxdlet_core::{AdapterConfig, LxdletError};
use lxdlet_lxd::{ContainerInfo, HypervisorClient, NewContainer};

use crate::container::{belongs_to_sandbox, creation_config, to_container_status, to_cri_container};
use crate::cri_api::runtime_service_server::RuntimeService;
use crate::cri_api::*;
use crate::error::lxdlet_error_to_status;
use crate::filter::{container_matches, pod_sandbox_matches};
use crate::identifier;
use crate::sandbox::{SandboxRecord, SandboxStore};

/// Version of the CRI wire contract reported to the kubelet.
const KUBELET_API_VERSION: &str = "0.1.0";
const RUNTIME_NAME: &str = "lxd";
/// Hypervisor status of a container that needs no stop before deletion.
const STOPPED_STATUS: &str = "Stopped";

/// LXD implementation of the CRI RuntimeService.
pub struct LxdRuntimeService<C> {
    hypervisor: Arc<C>,
    sandboxes: Arc<SandboxStore>,
    config: Arc<AdapterConfig>,
}

impl<C: HypervisorClient + 'static> LxdRuntimeService<C> {
    /// Create a new LxdRuntimeService.
    pub fn new(hypervisor: Arc<C>, sandboxes: Arc<SandboxStore>, config: Arc<AdapterConfig>) -> Self {
        Self {
            hypervisor,
            sandboxes,
            config,
        }
    }

    fn load_sandbox(&self, sandbox_id: &str) -> Result<SandboxRecord, Status> {
        self.sandboxes
            .get(sandbox_id)
            .map_err(lxdlet_error_to_status)?
            .ok_or_else(|| Status::not_found(format!("Sandbox not found: {}", sandbox_id)))
    }

    /// Best-effort network status: the first IPv4 address reported by a
    /// container of the sandbox.
    async fn sandbox_network(&self, sandbox_id: &str) -> Option<PodSandboxNetworkStatus> {
        let containers = match self.hypervisor.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::debug!(sandbox_id = %sandbox_id, error = %e, "Skipping sandbox network lookup");
                return None;
            }
        };

        for info in containers
            .iter()
            .filter(|info| belongs_to_sandbox(info, sandbox_id))
        {
            match self.hypervisor.container_state(&info.name).await {
                Ok(state) => {
                    if let Some(ip) = state.ipv4_address() {
                        return Some(PodSandboxNetworkStatus {
                            ip: ip.to_string(),
                            additional_ips: vec![],
                        });
                    }
                }
                Err(e) => {
                    tracing::debug!(container_id = %info.name, error = %e, "Container state unavailable");
                }
            }
        }
        None
    }

    async fn sandbox_containers(&self, sandbox_id: &str) -> Result<Vec<ContainerInfo>, Status> {
        let containers = self
            .hypervisor
            .list_containers()
            .await
            .map_err(lxdlet_error_to_status)?;
        Ok(containers
            .into_iter()
            .filter(|info| belongs_to_sandbox(info, sandbox_id))
            .collect())
    }

    /// Force-stop every live container of the sandbox, deleting them too when
    /// `remove` is set.
    async fn terminate_containers(&self, sandbox_id: &str, remove: bool) -> Result<(), Status> {
        for info in self.sandbox_containers(sandbox_id).await? {
            if info.status != STOPPED_STATUS {
                tracing::info!(sandbox_id = %sandbox_id, container_id = %info.name, "Stopping sandbox container");
                self.hypervisor
                    .stop_container(&info.name, true)
                    .await
                    .map_err(lxdlet_error_to_status)?;
            }
            if remove {
                tracing::info!(sandbox_id = %sandbox_id, container_id = %info.name, "Removing sandbox container");
                self.hypervisor
                    .delete_container(&info.name, true)
                    .await
                    .map_err(lxdlet_error_to_status)?;
            }
        }
        Ok(())
    }

    fn remove_record(&self, sandbox_id: &str) -> Result<(), Status> {
        self.sandboxes
            .remove(sandbox_id)
            .map_err(lxdlet_error_to_status)
    }
}

/// Status of a sandbox as recorded, without network information.
fn record_status(record: &SandboxRecord) -> PodSandboxStatus {
    let config = &record.config;
    PodSandboxStatus {
        id: record.pod_uid.clone(),
        metadata: config.metadata.clone(),
        state: record.state().into(),
        created_at: record.created_at,
        network: None,
        labels: config.labels.clone(),
        annotations: config.annotations.clone(),
        runtime_handler: String::new(),
    }
}

#[tonic::async_trait]
impl<C: HypervisorClient + 'static> RuntimeService for LxdRuntimeService<C> {
    // ── Version ──────────────────────────────────────────────────────

    async fn version(
        &self,
        _request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        let info = self
            .hypervisor
            .server_info()
            .await
            .map_err(lxdlet_error_to_status)?;

        Ok(Response::new(VersionResponse {
            version: KUBELET_API_VERSION.to_string(),
            runtime_name: RUNTIME_NAME.to_string(),
            runtime_version: info.environment.server_version,
            runtime_api_version: info.api_version,
        }))
    }

    // ── Pod Sandbox ──────────────────────────────────────────────────

    async fn run_pod_sandbox(
        &self,
        request: Request<RunPodSandboxRequest>,
    ) -> Result<Response<RunPodSandboxResponse>, Status> {
        let req = request.into_inner();
        let config = req
            .config
            .ok_or_else(|| Status::invalid_argument("sandbox config required"))?;

        let metadata = config
            .metadata
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("sandbox metadata required"))?;
        if metadata.uid.is_empty() {
            return Err(Status::invalid_argument("sandbox uid required"));
        }

        let sandbox_id = identifier::sandbox_id(&metadata.uid).to_string();

        tracing::info!(
            sandbox_id = %sandbox_id,
            name = %metadata.name,
            namespace = %metadata.namespace,
            "CRI RunPodSandbox"
        );

        self.sandboxes
            .put(&sandbox_id, &config)
            .map_err(lxdlet_error_to_status)?;

        Ok(Response::new(RunPodSandboxResponse {
            pod_sandbox_id: sandbox_id,
        }))
    }

    async fn stop_pod_sandbox(
        &self,
        request: Request<StopPodSandboxRequest>,
    ) -> Result<Response<StopPodSandboxResponse>, Status> {
        let req = request.into_inner();
        let sandbox_id = &req.pod_sandbox_id;

        tracing::info!(sandbox_id = %sandbox_id, "CRI StopPodSandbox");

        if self.config.terminate_containers_on_sandbox_stop {
            self.terminate_containers(sandbox_id, false).await?;
        }
        self.remove_record(sandbox_id)?;

        Ok(Response::new(StopPodSandboxResponse {}))
    }

    async fn remove_pod_sandbox(
        &self,
        request: Request<RemovePodSandboxRequest>,
    ) -> Result<Response<RemovePodSandboxResponse>, Status> {
        let req = request.into_inner();
        let sandbox_id = &req.pod_sandbox_id;

        tracing::info!(sandbox_id = %sandbox_id, "CRI RemovePodSandbox");

        if self.config.terminate_containers_on_sandbox_stop {
            self.terminate_containers(sandbox_id, true).await?;
        }
        self.remove_record(sandbox_id)?;

        Ok(Response::new(RemovePodSandboxResponse {}))
    }

    async fn pod_sandbox_status(
        &self,
        request: Request<PodSandboxStatusRequest>,
    ) -> Result<Response<PodSandboxStatusResponse>, Status> {
        let req = request.into_inner();
        let sandbox_id = &req.pod_sandbox_id;

        let record = self.load_sandbox(sandbox_id)?;
        let mut status = record_status(&record);
        status.network = self.sandbox_network(sandbox_id).await;

        Ok(Response::new(PodSandboxStatusResponse {
            status: Some(status),
            info: Default::default(),
        }))
    }

    async fn list_pod_sandbox(
        &self,
        request: Request<ListPodSandboxRequest>,
    ) -> Result<Response<ListPodSandboxResponse>, Status> {
        let req = request.into_inner();

        let uids = self.sandboxes.list().map_err(lxdlet_error_to_status)?;

        let mut items = Vec::with_capacity(uids.len());
        for uid in uids {
            // Removed since the directory was read.
            let Some(record) = self.sandboxes.get(&uid).map_err(lxdlet_error_to_status)? else {
                continue;
            };
            let status = record_status(&record);
            if !pod_sandbox_matches(&status, req.filter.as_ref()) {
                continue;
            }
            items.push(PodSandbox {
                id: status.id,
                metadata: status.metadata,
                state: status.state,
                created_at: status.created_at,
                labels: status.labels,
                annotations: status.annotations,
                runtime_handler: status.runtime_handler,
            });
        }

        Ok(Response::new(ListPodSandboxResponse { items }))
    }

    // ── Container ────────────────────────────────────────────────────

    async fn create_container(
        &self,
        request: Request<CreateContainerRequest>,
    ) -> Result<Response<CreateContainerResponse>, Status> {
        let req = request.into_inner();
        let sandbox_id = &req.pod_sandbox_id;

        let config = req
            .config
            .ok_or_else(|| Status::invalid_argument("container config required"))?;

        let metadata = config
            .metadata
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("container metadata required"))?;

        let image = config
            .image
            .as_ref()
            .map(|i| identifier::normalize_image(&i.image, &self.config.registry_prefix))
            .unwrap_or_default();
        if image.is_empty() {
            return Err(Status::invalid_argument("container image required"));
        }

        let container_id = identifier::container_id(sandbox_id, &metadata.name);

        tracing::info!(
            sandbox_id = %sandbox_id,
            container_id = %container_id,
            image = %image,
            "CRI CreateContainer"
        );

        let new_container = NewContainer {
            name: container_id.clone(),
            image: image.clone(),
            config: creation_config(sandbox_id, &config),
        };

        self.hypervisor
            .create_container(&new_container, true)
            .await
            .map_err(|e| {
                lxdlet_error_to_status(LxdletError::ContainerCreateError {
                    container_id: container_id.clone(),
                    image,
                    source: Box::new(e),
                })
            })?;

        Ok(Response::new(CreateContainerResponse { container_id }))
    }

    async fn start_container(
        &self,
        request: Request<StartContainerRequest>,
    ) -> Result<Response<StartContainerResponse>, Status> {
        let req = request.into_inner();
        let container_id = &req.container_id;

        tracing::info!(container_id = %container_id, "CRI StartContainer");

        self.hypervisor
            .start_container(container_id, true)
            .await
            .map_err(lxdlet_error_to_status)?;

        Ok(Response::new(StartContainerResponse {}))
    }

    async fn stop_container(
        &self,
        request: Request<StopContainerRequest>,
    ) -> Result<Response<StopContainerResponse>, Status> {
        let req = request.into_inner();
        let container_id = &req.container_id;

        tracing::info!(container_id = %container_id, "CRI StopContainer");

        self.hypervisor
            .stop_container(container_id, true)
            .await
            .map_err(lxdlet_error_to_status)?;

        Ok(Response::new(StopContainerResponse {}))
    }

    async fn remove_container(
        &self,
        request: Request<RemoveContainerRequest>,
    ) -> Result<Response<RemoveContainerResponse>, Status> {
        let req = request.into_inner();
        let container_id = &req.container_id;

        tracing::info!(container_id = %container_id, "CRI RemoveContainer");

        self.hypervisor
            .delete_container(container_id, true)
            .await
            .map_err(lxdlet_error_to_status)?;

        Ok(Response::new(RemoveContainerResponse {}))
    }

    async fn container_status(
        &self,
        request: Request<ContainerStatusRequest>,
    ) -> Result<Response<ContainerStatusResponse>, Status> {
        let req = request.into_inner();
        let container_id = &req.container_id;

        if !identifier::is_managed(container_id) {
            return Err(Status::not_found(format!(
                "Container not found: {}",
                container_id
            )));
        }

        let info = self
            .hypervisor
            .get_container(container_id)
            .await
            .map_err(lxdlet_error_to_status)?;

        Ok(Response::new(ContainerStatusResponse {
            status: Some(to_container_status(&info)),
            info: Default::default(),
        }))
    }

    async fn list_containers(
        &self,
        request: Request<ListContainersRequest>,
    ) -> Result<Response<ListContainersResponse>, Status> {
        let req = request.into_inner();

        let containers = self
            .hypervisor
            .list_containers()
            .await
            .map_err(lxdlet_error_to_status)?
            .iter()
            .filter_map(to_cri_container)
            .filter(|c| container_matches(c, req.filter.as_ref()))
            .collect();

        Ok(Response::new(ListContainersResponse { containers }))
    }

    // ── Status ───────────────────────────────────────────────────────

    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let conditions = vec![
            RuntimeCondition {
                r#type: "RuntimeReady".to_string(),
                status: true,
                reason: String::new(),
                message: String::new(),
            },
            RuntimeCondition {
                r#type: "NetworkReady".to_string(),
                status: true,
                reason: String::new(),
                message: String::new(),
            },
        ];

        Ok(Response::new(StatusResponse {
            status: Some(RuntimeStatus { conditions }),
            info: HashMap::new(),
        }))
    }

    async fn update_runtime_config(
        &self,
        _request: Request<UpdateRuntimeConfigRequest>,
    ) -> Result<Response<UpdateRuntimeConfigResponse>, Status> {
        Err(Status::unimplemented("UpdateRuntimeConfig not implemented"))
    }

    // ── Not supported by LXD ─────────────────────────────────────────

    async fn exec_sync(
        &self,
        _request: Request<ExecSyncRequest>,
    ) -> Result<Response<ExecSyncResponse>, Status> {
        Err(Status::unimplemented("ExecSync not implemented"))
    }

    async fn exec(
        &self,
        _request: Request<ExecRequest>,
    ) -> Result<Response<ExecResponse>, Status> {
        Err(Status::unimplemented("Exec not implemented"))
    }

    async fn attach(
        &self,
        _request: Request<AttachRequest>,
    ) -> Result<Response<AttachResponse>, Status> {
        Err(Status::unimplemented("Attach not implemented"))
    }

    async fn port_forward(
        &self,
        _request: Request<PortForwardRequest>,
    ) -> Result<Response<PortForwardResponse>, Status> {
        Err(Status::unimplemented("PortForward not implemented"))
    }

    async fn container_stats(
        &self,
        _request: Request<ContainerStatsRequest>,
    ) -> Result<Response<ContainerStatsResponse>, Status> {
        Err(Status::unimplemented("ContainerStats not implemented"))
    }

    async fn list_container_stats(
        &self,
        _request: Request<ListContainerStatsRequest>,
    ) -> Result<Response<ListContainerStatsResponse>, Status> {
        Err(Status::unimplemented("ListContainerStats not implemented"))
    }

    async fn update_container_resources(
        &self,
        _request: Request<UpdateContainerResourcesRequest>,
    ) -> Result<Response<UpdateContainerResourcesResponse>, Status> {
        Err(Status::unimplemented(
            "UpdateContainerResources not implemented",
        ))
    }

    async fn reopen_container_log(
        &self,
        _request: Request<ReopenContainerLogRequest>,
    ) -> Result<Response<ReopenContainerLogResponse>, Status> {
        Err(Status::unimplemented("ReopenContainerLog not implemented"))
    }
}
