//! Client error types for the registry

use etcd_registry_api::ConnectionStringError;

/// Error type for registry operations
///
/// "Not found" is never an error: store reads return `Option` and directory
/// reads return an empty list.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("transport error after {attempts} attempt(s): {source}")]
    Transport {
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },

    #[error("store returned status {status}: {message}")]
    Store { status: u16, message: String },

    #[error("failed to decode store response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidConnectionString(#[from] ConnectionStringError),

    #[error("no store hosts configured")]
    NoHosts,

    #[error("registry destroyed")]
    Destroyed,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RegistryError {
    /// Whether the error came from the network rather than the store
    pub fn is_transport(&self) -> bool {
        matches!(self, RegistryError::Transport { .. })
    }

    /// HTTP status carried by a store error
    pub fn status(&self) -> Option<u16> {
        match self {
            RegistryError::Store { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
