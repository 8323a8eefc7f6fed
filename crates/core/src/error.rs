//! Error taxonomy of the keeper core.

use std::path::PathBuf;

use keeper_api::ApiError;
use keeper_chain::{FeeError, SigningError};
use thiserror::Error;

/// Failure of a single RPC Gateway call.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Transient: the service may answer if asked again.
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with a semantic rejection or unusable data.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Network(_))
    }
}

impl From<ApiError> for GatewayError {
    fn from(err: ApiError) -> Self {
        if err.is_transient() {
            GatewayError::Network(err.to_string())
        } else {
            GatewayError::Protocol(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PollError {
    #[error("snapshot poll exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: GatewayError },

    #[error("snapshot rejected by RPC service: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "keeper already running on {path} (held by {holder}); \
         if that process is gone, run `self unlock`"
    )]
    AlreadyLocked { path: PathBuf, holder: String },

    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of one transaction submission, by stage.
///
/// Rejected and timed-out broadcasts are outcomes, not errors, and are
/// reported through [`TxStatus`](crate::TxStatus).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("coin {coin} is spent or unknown, snapshot is stale")]
    StaleCoin { coin: String },

    #[error("build failed: {0}")]
    Build(GatewayError),

    #[error("fee resolution failed: {0}")]
    Fee(#[from] FeeError),

    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("broadcast failed after {attempts} attempts: {last}")]
    Broadcast { attempts: u32, last: GatewayError },
}

impl PipelineError {
    /// Whether the failure happened before anything reached the network.
    pub fn before_broadcast(&self) -> bool {
        !matches!(self, PipelineError::Broadcast { .. })
    }

    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::StaleCoin { .. } | PipelineError::Build(_) => "build",
            PipelineError::Fee(_) => "build",
            PipelineError::Signing(_) => "sign",
            PipelineError::Broadcast { .. } => "broadcast",
        }
    }
}

/// Errors that end a keeper run.
#[derive(Debug, Error)]
pub enum KeeperError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("signer setup failed: {0}")]
    Signer(#[from] SigningError),
}
