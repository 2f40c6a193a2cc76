//! JSON-RPC API Layer
//!
//! Admin and query surface of the Quill queue daemon (JSON-RPC 2.0 over HTTP).

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use jsonrpsee::server::ServerHandle;
pub use server::{RpcServer, RpcServerConfig};
