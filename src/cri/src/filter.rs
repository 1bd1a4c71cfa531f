//! CRI list filters. Every criterion present in a filter must match;
//! an absent or empty filter matches everything.

use std::collections::HashMap;

use crate::cri_api::{Container, ContainerFilter, PodSandboxFilter, PodSandboxStatus};

/// Whether `labels` carries every key/value pair in `selector`.
pub fn labels_match(labels: &HashMap<String, String>, selector: &HashMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).map_or(false, |label| label == v))
}

/// Apply a `PodSandboxFilter` to a sandbox status.
pub fn pod_sandbox_matches(status: &PodSandboxStatus, filter: Option<&PodSandboxFilter>) -> bool {
    let Some(filter) = filter else {
        return true;
    };

    if !filter.id.is_empty() && filter.id != status.id {
        return false;
    }
    if let Some(state) = &filter.state {
        if state.state != status.state {
            return false;
        }
    }
    labels_match(&status.labels, &filter.label_selector)
}

/// Apply a `ContainerFilter` to a container.
pub fn container_matches(container: &Container, filter: Option<&ContainerFilter>) -> bool {
    let Some(filter) = filter else {
        return true;
    };

    if !filter.id.is_empty() && filter.id != container.id {
        return false;
    }
    if let Some(state) = &filter.state {
        if state.state != container.state {
            return false;
        }
    }
    if !filter.pod_sandbox_id.is_empty() && filter.pod_sandbox_id != container.pod_sandbox_id {
        return false;
    }
    labels_match(&container.labels, &filter.label_selector)
}
