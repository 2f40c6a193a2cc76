//! Quill SDK - Rust Client Library
//!
//! Two clients:
//! - [`QueueClient`] joins the queue over WebSocket and follows a request
//!   until its book is delivered.
//! - [`AdminClient`] talks to the daemon's JSON-RPC admin API.
//!
//! # Example
//!
//! ```no_run
//! use quill_core::domain::{BookRequest, ServerEvent};
//! use quill_sdk::{ConnectOptions, QueueClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = QueueClient::new(ConnectOptions::new("ws://127.0.0.1:8080").member("jane"));
//!     client.connect().await?;
//!     client.join(None, BookRequest::sample("Ferris the Crab")).await?;
//!
//!     let done = client
//!         .wait_for(|e| matches!(e, ServerEvent::DispatchCompleted { .. } | ServerEvent::DispatchFailed { .. }))
//!         .await?;
//!     println!("{:?}", done);
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

mod admin;
mod error;
mod queue;
mod types;

pub use admin::AdminClient;
pub use error::{rpc_code, Result, SdkError};
pub use queue::{ConnectOptions, QueueClient, QueueView};
pub use types::{EvictResponse, MemberRequest, PositionResponse, StatsResponse, UsersResponse};
