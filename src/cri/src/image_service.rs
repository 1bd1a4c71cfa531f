//! CRI ImageService implementation.
//!
//! Maps CRI image operations to LXD image aliases. Image references are
//! normalized the same way CreateContainer does, so a pulled image is found
//! again under the alias containers are created from.

use std::path::PathBuf;
use std::sync::Arc;

use tonic::{Request, Response, Status};

use lxdlet_core::AdapterConfig;
use lxdlet_lxd::{HypervisorClient, ImageInfo};

use crate::cri_api::image_service_server::ImageService;
use crate::cri_api::*;
use crate::error::lxdlet_error_to_status;
use crate::identifier::normalize_image;

/// LXD implementation of the CRI ImageService.
pub struct LxdImageService<C> {
    hypervisor: Arc<C>,
    config: Arc<AdapterConfig>,
}

impl<C: HypervisorClient + 'static> LxdImageService<C> {
    /// Create a new LxdImageService.
    pub fn new(hypervisor: Arc<C>, config: Arc<AdapterConfig>) -> Self {
        Self { hypervisor, config }
    }

    fn alias(&self, spec: Option<ImageSpec>) -> Result<String, Status> {
        let spec = spec.ok_or_else(|| Status::invalid_argument("image spec required"))?;
        let alias = normalize_image(&spec.image, &self.config.registry_prefix);
        if alias.is_empty() {
            return Err(Status::invalid_argument("image reference required"));
        }
        Ok(alias)
    }

    /// Directory LXD keeps its image files in.
    fn image_dir(&self) -> PathBuf {
        self.config
            .lxd_socket
            .parent()
            .map(|dir| dir.join("images"))
            .unwrap_or_default()
    }
}

fn to_cri_image(info: ImageInfo) -> Image {
    let repo_tags: Vec<String> = info.aliases.into_iter().map(|a| a.name).collect();
    let spec = repo_tags.first().map(|tag| ImageSpec {
        image: tag.clone(),
        annotations: Default::default(),
    });
    Image {
        id: info.fingerprint,
        repo_tags,
        repo_digests: vec![],
        size: info.size,
        uid: None,
        username: String::new(),
        spec,
        pinned: false,
    }
}

#[tonic::async_trait]
impl<C: HypervisorClient + 'static> ImageService for LxdImageService<C> {
    async fn list_images(
        &self,
        request: Request<ListImagesRequest>,
    ) -> Result<Response<ListImagesResponse>, Status> {
        let req = request.into_inner();

        let wanted = req
            .filter
            .and_then(|f| f.image)
            .filter(|spec| !spec.image.is_empty())
            .map(|spec| normalize_image(&spec.image, &self.config.registry_prefix));

        let images = self
            .hypervisor
            .list_images()
            .await
            .map_err(lxdlet_error_to_status)?
            .into_iter()
            .filter(|info| match &wanted {
                Some(alias) => info.aliases.iter().any(|a| &a.name == alias),
                None => true,
            })
            .map(to_cri_image)
            .collect();

        Ok(Response::new(ListImagesResponse { images }))
    }

    async fn image_status(
        &self,
        request: Request<ImageStatusRequest>,
    ) -> Result<Response<ImageStatusResponse>, Status> {
        let req = request.into_inner();
        let alias = self.alias(req.image)?;

        let image = match self.hypervisor.get_image(&alias).await {
            Ok(info) => Some(to_cri_image(info)),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(lxdlet_error_to_status(e)),
        };

        Ok(Response::new(ImageStatusResponse {
            image,
            info: Default::default(),
        }))
    }

    async fn pull_image(
        &self,
        request: Request<PullImageRequest>,
    ) -> Result<Response<PullImageResponse>, Status> {
        let req = request.into_inner();
        let alias = self.alias(req.image)?;

        tracing::info!(image = %alias, "CRI PullImage");

        self.hypervisor
            .pull_image(&alias, true)
            .await
            .map_err(lxdlet_error_to_status)?;

        let info = self
            .hypervisor
            .get_image(&alias)
            .await
            .map_err(lxdlet_error_to_status)?;

        Ok(Response::new(PullImageResponse {
            image_ref: info.fingerprint,
        }))
    }

    async fn remove_image(
        &self,
        request: Request<RemoveImageRequest>,
    ) -> Result<Response<RemoveImageResponse>, Status> {
        let req = request.into_inner();
        let alias = self.alias(req.image)?;

        tracing::info!(image = %alias, "CRI RemoveImage");

        match self.hypervisor.delete_image(&alias, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(image = %alias, "Image already absent");
            }
            Err(e) => return Err(lxdlet_error_to_status(e)),
        }

        Ok(Response::new(RemoveImageResponse {}))
    }

    async fn image_fs_info(
        &self,
        _request: Request<ImageFsInfoRequest>,
    ) -> Result<Response<ImageFsInfoResponse>, Status> {
        let total_bytes: u64 = self
            .hypervisor
            .list_images()
            .await
            .map_err(lxdlet_error_to_status)?
            .iter()
            .map(|info| info.size)
            .sum();

        let usage = FilesystemUsage {
            timestamp: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
            fs_id: Some(FilesystemIdentifier {
                mountpoint: self.image_dir().to_string_lossy().to_string(),
            }),
            used_bytes: Some(UInt64Value { value: total_bytes }),
            inodes_used: None,
        };

        Ok(Response::new(ImageFsInfoResponse {
            image_filesystems: vec![usage],
        }))
    }
}
