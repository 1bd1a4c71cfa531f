//! Container and sandbox naming.
//!
//! Container identifiers are LXD container names of the form
//! `pod-<pod prefix>-<container name>`, where the pod prefix is the first
//! hyphen-delimited segment of the sandbox identifier. Sandbox identifiers
//! are the pod UID, verbatim.

/// Leading segment of every container identifier lxdlet creates.
pub const CONTAINER_ID_PREFIX: &str = "pod";

/// Tag the hypervisor uses for the default image version.
const LATEST_TAG: &str = ":latest";

/// Sandbox identifier for a pod.
pub fn sandbox_id(pod_uid: &str) -> &str {
    pod_uid
}

/// First hyphen-delimited segment of a sandbox identifier.
pub fn pod_prefix(sandbox_id: &str) -> &str {
    sandbox_id.split('-').next().unwrap_or(sandbox_id)
}

/// Identifier prefix shared by all containers of a sandbox (`pod-<prefix>-`).
pub fn container_id_prefix(sandbox_id: &str) -> String {
    format!("{}-{}-", CONTAINER_ID_PREFIX, pod_prefix(sandbox_id))
}

/// Compose the container identifier for `name` in `sandbox_id`.
pub fn container_id(sandbox_id: &str, name: &str) -> String {
    format!("{}{}", container_id_prefix(sandbox_id), name)
}

/// Whether a hypervisor container name follows the lxdlet convention.
/// Names without a hyphen belong to something else.
pub fn is_managed(hypervisor_name: &str) -> bool {
    hypervisor_name.contains('-')
}

/// Recover the CRI container name from a hypervisor container name.
///
/// Names built by [`container_id`] give back the declared name; other
/// hyphenated names yield the part after the first hyphen. Foreign names
/// yield `None`.
pub fn container_name(hypervisor_name: &str) -> Option<&str> {
    if let Some(rest) = hypervisor_name
        .strip_prefix(CONTAINER_ID_PREFIX)
        .and_then(|rest| rest.strip_prefix('-'))
    {
        if let Some((_, name)) = rest.split_once('-') {
            return Some(name);
        }
    }
    hypervisor_name.split_once('-').map(|(_, name)| name)
}

/// Rewrite a registry-style image reference into an LXD image alias.
///
/// References under `registry_prefix` lose the registry host and an
/// implicit `:latest` tag, e.g. `docker.io/library/nginx:latest` becomes
/// `library/nginx`. Other references pass through unchanged.
pub fn normalize_image(reference: &str, registry_prefix: &str) -> String {
    if registry_prefix.is_empty() || !reference.starts_with(registry_prefix) {
        return reference.to_string();
    }

    let path = reference
        .split_once('/')
        .map(|(_, path)| path)
        .unwrap_or(reference);
    path.strip_suffix(LATEST_TAG).unwrap_or(path).to_string()
}
