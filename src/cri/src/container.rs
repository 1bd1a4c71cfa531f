//! CRI views of LXD containers.
//!
//! CRI metadata LXD has no field for (owning sandbox, declared image,
//! labels, annotations) travels in `user.cri.*` container config keys
//! written at creation time.

use std::collections::HashMap;

use lxdlet_lxd::ContainerInfo;

use crate::cri_api::{self, ContainerConfig, ContainerMetadata, ContainerStatus, ImageSpec};
use crate::identifier;
use crate::state::translate_state;

/// Owning sandbox identifier.
pub const KEY_POD_SANDBOX_ID: &str = "user.cri.pod-sandbox-id";
/// Image reference as requested by the kubelet.
pub const KEY_IMAGE: &str = "user.cri.image";
/// Container restart attempt.
pub const KEY_ATTEMPT: &str = "user.cri.attempt";
/// Container log path.
pub const KEY_LOG_PATH: &str = "user.cri.log-path";
/// Prefix of label keys.
pub const KEY_LABEL_PREFIX: &str = "user.cri.label.";
/// Prefix of annotation keys.
pub const KEY_ANNOTATION_PREFIX: &str = "user.cri.annotation.";

/// Config keys recording the CRI metadata of a new container.
pub fn creation_config(sandbox_id: &str, config: &ContainerConfig) -> HashMap<String, String> {
    let mut keys = HashMap::new();
    keys.insert(KEY_POD_SANDBOX_ID.to_string(), sandbox_id.to_string());

    if let Some(image) = &config.image {
        keys.insert(KEY_IMAGE.to_string(), image.image.clone());
    }
    if let Some(metadata) = &config.metadata {
        keys.insert(KEY_ATTEMPT.to_string(), metadata.attempt.to_string());
    }
    if !config.log_path.is_empty() {
        keys.insert(KEY_LOG_PATH.to_string(), config.log_path.clone());
    }
    for (k, v) in &config.labels {
        keys.insert(format!("{}{}", KEY_LABEL_PREFIX, k), v.clone());
    }
    for (k, v) in &config.annotations {
        keys.insert(format!("{}{}", KEY_ANNOTATION_PREFIX, k), v.clone());
    }
    keys
}

/// Whether a hypervisor container belongs to the given sandbox.
///
/// Only the owner key counts: pods whose UIDs share a first segment share
/// the `pod-<prefix>-` name prefix too.
pub fn belongs_to_sandbox(info: &ContainerInfo, sandbox_id: &str) -> bool {
    identifier::is_managed(&info.name)
        && info
            .config
            .get(KEY_POD_SANDBOX_ID)
            .map_or(false, |owner| owner == sandbox_id)
}

/// CRI container for a hypervisor container, or `None` for foreign ones.
pub fn to_cri_container(info: &ContainerInfo) -> Option<cri_api::Container> {
    if !identifier::is_managed(&info.name) {
        return None;
    }

    Some(cri_api::Container {
        id: info.name.clone(),
        pod_sandbox_id: config_value(info, KEY_POD_SANDBOX_ID),
        metadata: Some(metadata(info)),
        image: Some(image_spec(info)),
        image_ref: image_ref(info),
        state: translate_state(&info.status).into(),
        created_at: info.created_at_nanos(),
        labels: prefixed(&info.config, KEY_LABEL_PREFIX),
        annotations: prefixed(&info.config, KEY_ANNOTATION_PREFIX),
    })
}

/// CRI container status for a hypervisor container.
pub fn to_container_status(info: &ContainerInfo) -> ContainerStatus {
    ContainerStatus {
        id: info.name.clone(),
        metadata: Some(metadata(info)),
        state: translate_state(&info.status).into(),
        created_at: info.created_at_nanos(),
        image: Some(image_spec(info)),
        image_ref: image_ref(info),
        labels: prefixed(&info.config, KEY_LABEL_PREFIX),
        annotations: prefixed(&info.config, KEY_ANNOTATION_PREFIX),
        log_path: config_value(info, KEY_LOG_PATH),
        ..Default::default()
    }
}

fn metadata(info: &ContainerInfo) -> ContainerMetadata {
    ContainerMetadata {
        name: identifier::container_name(&info.name)
            .unwrap_or(&info.name)
            .to_string(),
        attempt: info
            .config
            .get(KEY_ATTEMPT)
            .and_then(|a| a.parse().ok())
            .unwrap_or(0),
    }
}

fn image_spec(info: &ContainerInfo) -> ImageSpec {
    let image = info
        .config
        .get(KEY_IMAGE)
        .or_else(|| info.config.get("image.serial"))
        .cloned()
        .unwrap_or_default();
    ImageSpec {
        image,
        annotations: HashMap::new(),
    }
}

fn image_ref(info: &ContainerInfo) -> String {
    info.config
        .get("volatile.base_image")
        .or_else(|| info.config.get("image.release"))
        .cloned()
        .unwrap_or_default()
}

fn config_value(info: &ContainerInfo, key: &str) -> String {
    info.config.get(key).cloned().unwrap_or_default()
}

fn prefixed(config: &HashMap<String, String>, prefix: &str) -> HashMap<String, String> {
    config
        .iter()
        .filter_map(|(k, v)| k.strip_prefix(prefix).map(|k| (k.to_string(), v.clone())))
        .collect()
}
