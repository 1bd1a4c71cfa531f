//! LXD hypervisor access for lxdlet.
//!
//! `HypervisorClient` is the seam the CRI services talk through;
//! `LxdClient` implements it against the LXD REST API on a unix socket.

pub mod api;
pub mod client;
pub mod http;

pub use api::{
    ContainerInfo, ContainerRuntimeState, ImageAlias, ImageInfo, NetworkAddress,
    NetworkInterface, Operation, ServerEnvironment, ServerInfo,
};
pub use client::{HypervisorClient, NewContainer};
pub use http::LxdClient;
