//! Error types for the keeper service

use thiserror::Error;
use tranche_types::{PoolId, ProtocolError};

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Registry unavailable after {attempts} attempts: {reason}")]
    RegistryUnavailable { attempts: u32, reason: String },

    #[error("Timed out reading pool {pool} after {timeout_ms}ms")]
    ReadTimeout { pool: PoolId, timeout_ms: u64 },

    #[error("Failed to read pool {pool}: {reason}")]
    ReadError { pool: PoolId, reason: String },

    #[error("Failed to submit transaction for pool {pool}: {reason}")]
    SubmitFailed { pool: PoolId, reason: String },

    #[error("Signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<std::io::Error> for KeeperError {
    fn from(err: std::io::Error) -> Self {
        KeeperError::NetworkError(err.to_string())
    }
}

impl From<serde_json::Error> for KeeperError {
    fn from(err: serde_json::Error) -> Self {
        KeeperError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for KeeperError {
    fn from(err: reqwest::Error) -> Self {
        KeeperError::NetworkError(err.to_string())
    }
}

pub type KeeperResult<T> = std::result::Result<T, KeeperError>;
