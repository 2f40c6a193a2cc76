//! WebSocket transport
//!
//! Accepts client sockets, resolves their identity from the upgrade request,
//! and translates JSON frames to and from the queue gateway.

pub mod error;
pub mod handshake;
pub mod hub;
pub mod server;

pub use error::WsError;
pub use hub::ConnectionHub;
pub use server::{WsServer, WsServerConfig};
