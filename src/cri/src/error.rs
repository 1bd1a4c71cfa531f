//! CRI-specific error conversions.

use lxdlet_core::LxdletError;
use tonic::{Code, Status};

/// Convert an LxdletError to a gRPC Status.
pub fn lxdlet_error_to_status(err: LxdletError) -> Status {
    let code = status_code(&err);
    Status::new(code, err.to_string())
}

fn status_code(err: &LxdletError) -> Code {
    match err {
        LxdletError::NotFound(_) => Code::NotFound,
        LxdletError::ConnectionError(_) => Code::Unavailable,
        LxdletError::CorruptRecord { .. } => Code::DataLoss,
        LxdletError::InvalidArgument(_) | LxdletError::ConfigError(_) => Code::InvalidArgument,
        LxdletError::ContainerCreateError { source, .. } => status_code(source),
        LxdletError::IoError(e) if e.kind() == std::io::ErrorKind::NotFound => Code::NotFound,
        _ => Code::Internal,
    }
}
