//! Protocol errors

use crate::data::StartError;
use crate::network::federation::FederationError;
use crate::network::rpc::RemoteError;
use crate::network::search::{ReplyError, RequestError};
use crate::network::share::{DownloadError, UploadError};

/// Errors returned by client and server nodes
#[derive(Debug)]
pub enum ProtocolError {
    /// Failed to open the database
    StartFailed(StartError),
    /// Database error
    Database(rusqlite::Error),
    /// IO error
    Io(std::io::Error),
    /// A remote call failed or was refused
    Remote(RemoteError),
    /// Search registration failed
    Request(RequestError),
    /// Unknown search or hash in the reply table
    Reply(ReplyError),
    /// Federation failure
    Federation(FederationError),
    /// Upload administration failure
    Upload(UploadError),
    /// Download administration failure
    Download(DownloadError),
    /// The client is not connected to a server
    NotConnected,
    /// The node has been shut down
    NotRunning,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::StartFailed(e) => write!(f, "failed to start node: {}", e),
            ProtocolError::Database(e) => write!(f, "database error: {}", e),
            ProtocolError::Io(e) => write!(f, "io error: {}", e),
            ProtocolError::Remote(e) => write!(f, "remote error: {}", e),
            ProtocolError::Request(e) => write!(f, "request error: {}", e),
            ProtocolError::Reply(e) => write!(f, "{}", e),
            ProtocolError::Federation(e) => write!(f, "federation error: {}", e),
            ProtocolError::Upload(e) => write!(f, "{}", e),
            ProtocolError::Download(e) => write!(f, "{}", e),
            ProtocolError::NotConnected => write!(f, "not connected to a server"),
            ProtocolError::NotRunning => write!(f, "node is not running"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::StartFailed(e) => Some(e),
            ProtocolError::Database(e) => Some(e),
            ProtocolError::Io(e) => Some(e),
            ProtocolError::Remote(e) => Some(e),
            ProtocolError::Request(e) => Some(e),
            ProtocolError::Reply(e) => Some(e),
            ProtocolError::Federation(e) => Some(e),
            ProtocolError::Upload(e) => Some(e),
            ProtocolError::Download(e) => Some(e),
            ProtocolError::NotConnected | ProtocolError::NotRunning => None,
        }
    }
}

impl From<StartError> for ProtocolError {
    fn from(e: StartError) -> Self {
        ProtocolError::StartFailed(e)
    }
}

impl From<rusqlite::Error> for ProtocolError {
    fn from(e: rusqlite::Error) -> Self {
        ProtocolError::Database(e)
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e)
    }
}

impl From<RemoteError> for ProtocolError {
    fn from(e: RemoteError) -> Self {
        ProtocolError::Remote(e)
    }
}

impl From<RequestError> for ProtocolError {
    fn from(e: RequestError) -> Self {
        ProtocolError::Request(e)
    }
}

impl From<ReplyError> for ProtocolError {
    fn from(e: ReplyError) -> Self {
        ProtocolError::Reply(e)
    }
}

impl From<FederationError> for ProtocolError {
    fn from(e: FederationError) -> Self {
        ProtocolError::Federation(e)
    }
}

impl From<UploadError> for ProtocolError {
    fn from(e: UploadError) -> Self {
        ProtocolError::Upload(e)
    }
}

impl From<DownloadError> for ProtocolError {
    fn from(e: DownloadError) -> Self {
        ProtocolError::Download(e)
    }
}
