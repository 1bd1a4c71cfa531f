//! Folding of LXD lifecycle labels into the four CRI container states.

use crate::cri_api::ContainerState;

/// Translate an LXD container status label into a CRI container state.
///
/// Anything not confirmed running and not confirmed torn down is reported
/// as created, never running. Unknown labels map to `ContainerUnknown`.
pub fn translate_state(label: &str) -> ContainerState {
    match label {
        "Running" => ContainerState::ContainerRunning,
        "Stopped" | "Stopping" | "Starting" | "Started" => ContainerState::ContainerCreated,
        "Cancelling" | "Aborting" | "Freezing" | "Frozen" => ContainerState::ContainerExited,
        // Pending, Thawed, Error
        _ => ContainerState::ContainerUnknown,
    }
}
