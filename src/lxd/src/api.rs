//! Typed views of the LXD REST API (`/1.0`) bodies used by lxdlet.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// LXD operation status code for a successful operation.
pub const OPERATION_SUCCESS: u16 = 200;

/// Interface whose address is reported as the pod IP.
pub const PRIMARY_INTERFACE: &str = "eth0";

/// Standard LXD response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    /// `sync`, `async` or `error`.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub status_code: u16,
    /// Error message (error responses only).
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_code: u16,
    /// Operation path (async responses only).
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// `GET /1.0`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub environment: ServerEnvironment,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerEnvironment {
    #[serde(default)]
    pub server_version: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub storage: String,
}

/// A container as listed by `GET /1.0/containers?recursion=1`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    /// Lifecycle label, e.g. `Running` or `Stopped`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl ContainerInfo {
    /// Creation time in nanoseconds since the epoch.
    pub fn created_at_nanos(&self) -> i64 {
        self.created_at.timestamp_nanos_opt().unwrap_or(0)
    }
}

/// `GET /1.0/containers/<name>/state`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerRuntimeState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub pid: i64,
    /// Absent while the container is stopped.
    #[serde(default)]
    pub network: Option<HashMap<String, NetworkInterface>>,
}

impl ContainerRuntimeState {
    /// First IPv4 address of the primary interface, falling back to any
    /// other non-loopback interface (by name).
    pub fn ipv4_address(&self) -> Option<Ipv4Addr> {
        let network = self.network.as_ref()?;
        if let Some(ip) = network.get(PRIMARY_INTERFACE).and_then(|n| n.ipv4()) {
            return Some(ip);
        }

        let mut names: Vec<&String> = network
            .keys()
            .filter(|name| name.as_str() != "lo" && name.as_str() != PRIMARY_INTERFACE)
            .collect();
        names.sort();
        names
            .into_iter()
            .find_map(|name| network.get(name).and_then(|n| n.ipv4()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkInterface {
    #[serde(default)]
    pub addresses: Vec<NetworkAddress>,
    #[serde(default)]
    pub state: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl NetworkInterface {
    /// First address that parses as a valid IPv4 address.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.addresses
            .iter()
            .filter(|a| a.family.is_empty() || a.family == "inet")
            .find_map(|a| a.address.parse::<Ipv4Addr>().ok())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkAddress {
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub scope: String,
}

/// A local image (`GET /1.0/images?recursion=1`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageInfo {
    pub fingerprint: String,
    #[serde(default)]
    pub aliases: Vec<ImageAlias>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageAlias {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// `GET /1.0/images/aliases/<name>`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageAliasEntry {
    #[serde(default)]
    pub name: String,
    pub target: String,
}

/// A background operation, as returned by `GET /1.0/operations/<id>/wait`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub err: String,
}

impl Operation {
    pub fn succeeded(&self) -> bool {
        self.status_code == OPERATION_SUCCESS
    }
}

/// `POST /1.0/containers`
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ContainersPost<'a> {
    pub name: &'a str,
    pub source: ImageSource<'a>,
    pub config: &'a HashMap<String, String>,
}

/// Image source for container creation and image pulls.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ImageSource<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
    pub alias: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<&'a str>,
}

/// `PUT /1.0/containers/<name>/state`
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ContainerStatePut {
    pub action: &'static str,
    pub timeout: i32,
    pub force: bool,
    pub stateful: bool,
}

/// `POST /1.0/images`
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ImagesPost<'a> {
    pub source: ImageSource<'a>,
    pub aliases: Vec<ImageAlias>,
    pub auto_update: bool,
}
