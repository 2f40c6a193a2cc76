//! SDK Error Types

use jsonrpsee::core::ClientError;
use quill_core::domain::ErrorCode;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

pub type Result<T> = std::result::Result<T, SdkError>;

/// Admin RPC error codes returned by the daemon
pub mod rpc_code {
    pub const VALIDATION: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const THROTTLED: i32 = 4003;
    pub const INTERNAL: i32 = 5000;
}

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed by server")]
    Closed,

    /// Admin call answered with a JSON-RPC error object
    #[error("RPC error ({code}): {message}")]
    Rpc { code: i32, message: String },

    /// Gateway answered a queue event with an `error` frame
    #[error("Server rejected event ({code:?}): {message}")]
    Server { code: ErrorCode, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl SdkError {
    /// Member or entry did not exist on the daemon
    pub fn is_not_found(&self) -> bool {
        matches!(self, SdkError::Rpc { code: rpc_code::NOT_FOUND, .. })
    }

    pub fn is_throttled(&self) -> bool {
        matches!(
            self,
            SdkError::Rpc { code: rpc_code::THROTTLED, .. }
                | SdkError::Server { code: ErrorCode::RateLimited, .. }
        )
    }
}

impl From<ClientError> for SdkError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Call(call) => SdkError::Rpc {
                code: call.code(),
                message: call.message().to_string(),
            },
            ClientError::Transport(inner) => SdkError::Transport(inner.to_string()),
            ClientError::RestartNeeded(_) => SdkError::Closed,
            ClientError::ParseError(inner) => SdkError::Serialization(inner),
            other => SdkError::Other(other.to_string()),
        }
    }
}

impl From<WsError> for SdkError {
    fn from(e: WsError) -> Self {
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => SdkError::Closed,
            WsError::Url(url) => SdkError::InvalidUrl(url.to_string()),
            WsError::Http(response) => SdkError::Connection(format!(
                "Handshake rejected with status {}",
                response.status()
            )),
            other => SdkError::Transport(other.to_string()),
        }
    }
}
