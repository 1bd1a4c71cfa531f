use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LxdletError, Result};

/// Default LXD unix socket (snap installation).
pub const DEFAULT_LXD_SOCKET: &str = "/var/snap/lxd/common/lxd/unix.socket";

/// Default directory holding one record per pod sandbox.
pub const DEFAULT_SANDBOX_ROOT: &str = "/var/tmp/lxdlet/sandboxes";

/// Default socket the CRI services listen on.
pub const DEFAULT_LISTEN_SOCKET: &str = "/var/run/lxdlet/lxdlet.sock";

/// Default remote image server.
pub const DEFAULT_IMAGE_SERVER: &str = "https://images.linuxcontainers.org";

/// Adapter configuration, injected into the CRI services at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// LXD daemon unix socket
    pub lxd_socket: PathBuf,

    /// Directory of persisted sandbox records
    pub sandbox_root: PathBuf,

    /// Unix socket serving the CRI RuntimeService and ImageService
    pub listen_socket: PathBuf,

    /// Remote server images are created and pulled from (None = local aliases only)
    pub image_server: Option<String>,

    /// Protocol spoken by the remote image server
    pub image_protocol: String,

    /// Registry prefix stripped from image references
    pub registry_prefix: String,

    /// Stop (and on removal delete) a sandbox's containers when the sandbox goes away
    pub terminate_containers_on_sandbox_stop: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            lxd_socket: PathBuf::from(DEFAULT_LXD_SOCKET),
            sandbox_root: PathBuf::from(DEFAULT_SANDBOX_ROOT),
            listen_socket: PathBuf::from(DEFAULT_LISTEN_SOCKET),
            image_server: Some(DEFAULT_IMAGE_SERVER.to_string()),
            image_protocol: "simplestreams".to_string(),
            registry_prefix: "docker.io".to_string(),
            terminate_containers_on_sandbox_stop: false,
        }
    }
}

impl AdapterConfig {
    /// Load configuration from a YAML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            LxdletError::ConfigError(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&data)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(data)?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.lxd_socket.as_os_str().is_empty() {
            return Err(LxdletError::ConfigError(
                "lxd_socket must not be empty".to_string(),
            ));
        }
        if !self.sandbox_root.is_absolute() {
            return Err(LxdletError::ConfigError(format!(
                "sandbox_root must be an absolute path, got '{}'",
                self.sandbox_root.display()
            )));
        }
        if self.listen_socket.as_os_str().is_empty() {
            return Err(LxdletError::ConfigError(
                "listen_socket must not be empty".to_string(),
            ));
        }
        if let Some(server) = &self.image_server {
            if !(server.starts_with("https://") || server.starts_with("http://")) {
                return Err(LxdletError::ConfigError(format!(
                    "image_server must be an http(s) URL, got '{}'",
                    server
                )));
            }
            if self.image_protocol.is_empty() {
                return Err(LxdletError::ConfigError(
                    "image_protocol is required when image_server is set".to_string(),
                ));
            }
        }
        Ok(())
    }
}
