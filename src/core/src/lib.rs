//! lxdlet core - shared types for the LXD CRI adapter.
//!
//! Holds the error taxonomy and the adapter configuration used by the
//! hypervisor client and the CRI services.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::AdapterConfig;
pub use error::{LxdletError, Result};

/// lxdlet version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
