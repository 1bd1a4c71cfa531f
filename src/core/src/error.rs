use thiserror::Error;

/// lxdlet error types
#[derive(Error, Debug)]
pub enum LxdletError {
    /// The hypervisor socket could not be reached
    #[error("Hypervisor connection failed: {0}")]
    ConnectionError(String),

    /// The hypervisor reported that an entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The hypervisor rejected a request
    #[error("Hypervisor error: {status_code} - {message}")]
    HypervisorError { status_code: u16, message: String },

    /// A background hypervisor operation finished unsuccessfully
    #[error("Operation {operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    /// Container creation failed
    #[error("Failed to create container {container_id} from image {image}: {source}")]
    ContainerCreateError {
        container_id: String,
        image: String,
        #[source]
        source: Box<LxdletError>,
    },

    /// A persisted sandbox record could not be decoded
    #[error("Corrupt sandbox record for pod {pod_uid}: {message}")]
    CorruptRecord { pod_uid: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A request carried an unusable value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl LxdletError {
    /// Whether this error means the target entity does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            LxdletError::NotFound(_) => true,
            LxdletError::ContainerCreateError { source, .. } => source.is_not_found(),
            LxdletError::IoError(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for LxdletError {
    fn from(err: serde_json::Error) -> Self {
        LxdletError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for LxdletError {
    fn from(err: serde_yaml::Error) -> Self {
        LxdletError::SerializationError(err.to_string())
    }
}

/// Result type alias for lxdlet operations
pub type Result<T> = std::result::Result<T, LxdletError>;
