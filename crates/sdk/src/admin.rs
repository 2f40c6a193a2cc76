//! Admin JSON-RPC client

use crate::error::{Result, SdkError};
use crate::types::{EvictResponse, MemberRequest, PositionResponse, StatsResponse, UsersResponse};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use std::time::Duration;

/// Client for the daemon's admin API
///
/// # Example
///
/// ```no_run
/// use quill_sdk::AdminClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = AdminClient::connect("http://127.0.0.1:8081").await?;
/// let stats = client.stats().await?;
/// println!("{} waiting in the priority lane", stats.priority_size);
/// # Ok(())
/// # }
/// ```
pub struct AdminClient {
    client: HttpClient,
}

impl AdminClient {
    /// Connect to the admin endpoint (e.g. `http://127.0.0.1:8081`)
    pub async fn connect(url: impl AsRef<str>) -> Result<Self> {
        let url = url.as_ref();

        let client = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .build(url)
            .map_err(|e| SdkError::Connection(format!("Failed to create client: {}", e)))?;

        Ok(Self { client })
    }

    /// Lane sizes, in-flight generations and totals
    pub async fn stats(&self) -> Result<StatsResponse> {
        let response: StatsResponse = self.client.request("admin.stats.v1", rpc_params![]).await?;
        Ok(response)
    }

    /// Members with at least one live connection
    pub async fn users(&self) -> Result<UsersResponse> {
        let response: UsersResponse = self.client.request("admin.users.v1", rpc_params![]).await?;
        Ok(response)
    }

    /// Where a member currently stands
    pub async fn position(&self, member_id: impl Into<String>) -> Result<PositionResponse> {
        let params = rpc_params![MemberRequest {
            member_id: member_id.into()
        }];
        let response: PositionResponse = self.client.request("queue.position.v1", params).await?;
        Ok(response)
    }

    /// Remove a member's entry; fails with code 4001 if it has none
    pub async fn evict(&self, member_id: impl Into<String>) -> Result<EvictResponse> {
        let params = rpc_params![MemberRequest {
            member_id: member_id.into()
        }];
        let response: EvictResponse = self.client.request("queue.evict.v1", params).await?;
        Ok(response)
    }
}
