//! JSON-RPC Server
//!
//! Admin surface over HTTP on localhost: queue statistics, connected members,
//! position lookup and eviction.

use crate::handler::RpcHandler;
use crate::types::{EvictRequest, PositionRequest, StatsRequest, UsersRequest};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::{ErrorObjectOwned, Params};
use jsonrpsee::RpcModule;
use quill_core::application::{QueueGateway, RateLimiter};
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 8081;

// Admin traffic is low volume: 100 req/s with a burst of 200
const DEFAULT_RATE_LIMIT_BURST: u32 = 200;
const DEFAULT_RATE_LIMIT_PER_SEC: u32 = 100;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
    pub rate_limit_burst: u32,
    pub rate_limit_per_sec: u32,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            rate_limit_per_sec: DEFAULT_RATE_LIMIT_PER_SEC,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, gateway: Arc<QueueGateway>, dispatch_slots: usize) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_burst, config.rate_limit_per_sec);
        Self {
            handler: Arc::new(RpcHandler::new(gateway, dispatch_slots, limiter)),
            config,
        }
    }

    /// Start the JSON-RPC server
    ///
    /// Returns the bound address (port 0 resolves to an ephemeral port) and the
    /// handle used to stop it.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method("admin.stats.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: StatsRequest = parse_params(params)?;
                    handler.stats(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("admin.users.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: UsersRequest = parse_params(params)?;
                    handler.users(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.position.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: PositionRequest = parse_params(params)?;
                    handler.position(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.evict.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: EvictRequest = parse_params(params)?;
                    handler.evict(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        info!(addr = %local_addr, "JSON-RPC server started");

        let handle = server.start(module);
        Ok((local_addr, handle))
    }
}

/// Accept a by-name object, a single positional object, or no params at all
fn parse_params<T>(params: Params<'_>) -> Result<T, ErrorObjectOwned>
where
    T: DeserializeOwned + Default,
{
    if params.as_str().is_none() {
        return Ok(T::default());
    }
    if params.is_object() {
        params.parse()
    } else {
        params.one()
    }
}
