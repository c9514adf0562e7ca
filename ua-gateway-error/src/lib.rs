use anyhow::Error as AnyhowError;
use config::ConfigError;
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;
use thiserror::Error;
use tokio::{task::JoinError, time::Duration};

pub type GatewayResult<T, E = GatewayError> = anyhow::Result<T, E>;

/// Gateway error taxonomy.
///
/// Variants fall into three groups:
/// - server-side failures (`ServerUnavailable`, `Internal`, `Subscription`)
/// - caller-input failures that are never repaired silently (`InvalidNodeId`,
///   `ValueTypeMismatch`, `OutOfRange`, `NodeNotWritable`, `InvalidArgument`)
/// - encoding hard stops (`EncodingLimitExceeded`, `UnsupportedEncoding`,
///   `MalformedBinary`, `InvalidDictionary`)
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("server '{url}' unavailable: {reason}")]
    ServerUnavailable { url: String, reason: String },
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("type mismatch at '{path}': expected {expected}, found {found}")]
    ValueTypeMismatch {
        path: String,
        expected: String,
        found: String,
    },
    #[error("value at '{path}' out of range for {target}")]
    OutOfRange { path: String, target: String },
    #[error("node not writable: {0}")]
    NodeNotWritable(String),
    #[error("nesting depth limit {max_depth} exceeded")]
    EncodingLimitExceeded { max_depth: usize },
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("invalid type dictionary: {0}")]
    InvalidDictionary(String),
    #[error("malformed binary payload: {0}")]
    MalformedBinary(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported broker scheme: {0}")]
    UnsupportedBrokerScheme(String),
    #[error("publish error: {0}")]
    Publish(String),
    #[error("subscription error: {0}")]
    Subscription(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("{0}")]
    ConfigError(#[from] ConfigError),
    #[error("{0}")]
    Json(#[from] SerdeJsonError),
    #[error("{0}")]
    IoError(#[from] IoError),
    #[error("{0}")]
    JoinError(#[from] JoinError),
    #[error("{0}")]
    Anyhow(#[from] AnyhowError),
}

impl GatewayError {
    #[inline]
    pub fn server_unavailable(url: impl Into<String>, reason: impl ToString) -> Self {
        GatewayError::ServerUnavailable {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    #[inline]
    pub fn mismatch(
        path: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        GatewayError::ValueTypeMismatch {
            path: path.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    #[inline]
    pub fn out_of_range(path: impl Into<String>, target: impl Into<String>) -> Self {
        GatewayError::OutOfRange {
            path: path.into(),
            target: target.into(),
        }
    }

    /// True for failures caused by the caller's input rather than the server.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            GatewayError::InvalidNodeId(_)
                | GatewayError::ValueTypeMismatch { .. }
                | GatewayError::OutOfRange { .. }
                | GatewayError::NodeNotWritable(_)
                | GatewayError::InvalidArgument(_)
                | GatewayError::UnsupportedBrokerScheme(_)
                | GatewayError::EncodingLimitExceeded { .. }
                | GatewayError::UnsupportedEncoding(_)
        )
    }
}

impl From<String> for GatewayError {
    #[inline]
    fn from(e: String) -> Self {
        GatewayError::Internal(e)
    }
}

impl From<&str> for GatewayError {
    #[inline]
    fn from(e: &str) -> Self {
        GatewayError::Internal(e.to_string())
    }
}
