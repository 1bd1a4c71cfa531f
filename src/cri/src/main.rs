//! lxdlet - Kubernetes Container Runtime Interface binary.
//!
//! Serves CRI RuntimeService and ImageService over a Unix domain socket,
//! allowing kubelet to run pods as LXD containers.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lxdlet_core::AdapterConfig;
use lxdlet_cri::server::CriServer;

/// lxdlet CRI runtime
#[derive(Parser, Debug)]
#[command(name = "lxdlet", version, about = "Kubernetes CRI runtime backed by LXD")]
struct Args {
    /// YAML configuration file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Unix socket to serve CRI on.
    #[arg(long)]
    listen: Option<PathBuf>,

    /// LXD daemon unix socket.
    #[arg(long)]
    lxd_socket: Option<PathBuf>,

    /// Directory of persisted pod sandbox records.
    #[arg(long)]
    sandbox_root: Option<PathBuf>,

    /// Remote image server images are pulled from.
    #[arg(long)]
    image_server: Option<String>,

    /// Stop and remove a sandbox's containers together with the sandbox.
    #[arg(long)]
    terminate_containers: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> lxdlet_core::Result<AdapterConfig> {
        let mut config = match &self.config {
            Some(path) => AdapterConfig::from_file(path)?,
            None => AdapterConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen_socket = listen;
        }
        if let Some(socket) = self.lxd_socket {
            config.lxd_socket = socket;
        }
        if let Some(root) = self.sandbox_root {
            config.sandbox_root = root;
        }
        if let Some(server) = self.image_server {
            config.image_server = Some(server);
        }
        if self.terminate_containers {
            config.terminate_containers_on_sandbox_stop = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = args.into_config()?;

    tracing::info!(
        version = lxdlet_core::VERSION,
        listen = %config.listen_socket.display(),
        lxd_socket = %config.lxd_socket.display(),
        sandbox_root = %config.sandbox_root.display(),
        "Starting lxdlet"
    );

    let server = CriServer::new(config);
    server.serve().await?;

    Ok(())
}
