//! Transport Error Types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Accept failed: {0}")]
    Accept(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Identity rejected: {0}")]
    Identity(#[from] quill_core::port::IdentityError),
}
