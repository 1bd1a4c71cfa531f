//! lxdlet - Kubernetes Container Runtime Interface on top of LXD.
//!
//! Maps CRI concepts to LXD primitives:
//! - Container → LXD container named `pod-<pod uid prefix>-<name>`
//! - Pod Sandbox → persisted sandbox record (LXD has no pod concept)

pub mod container;
pub mod error;
pub mod filter;
pub mod identifier;
pub mod image_service;
pub mod runtime_service;
pub mod sandbox;
pub mod server;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

/// Generated CRI v1 protobuf types.
pub mod cri_api {
    tonic::include_proto!("runtime.v1");
}
