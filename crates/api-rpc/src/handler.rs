//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::{throttled, to_rpc_error, validation};
use crate::types::{
    EvictRequest, EvictResponse, PositionRequest, PositionResponse, StatsRequest, StatsResponse,
    UsersRequest, UsersResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use quill_core::application::{QueueGateway, RateLimiter};
use quill_core::domain::MemberId;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    gateway: Arc<QueueGateway>,
    dispatch_slots: usize,
    rate_limiter: RateLimiter,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(gateway: Arc<QueueGateway>, dispatch_slots: usize, rate_limiter: RateLimiter) -> Self {
        Self {
            gateway,
            dispatch_slots,
            rate_limiter,
            start_time: Instant::now(),
        }
    }

    fn throttle(&self) -> Result<(), ErrorObjectOwned> {
        if self.rate_limiter.check() {
            Ok(())
        } else {
            Err(throttled())
        }
    }

    /// admin.stats.v1
    pub async fn stats(&self, _params: StatsRequest) -> Result<StatsResponse, ErrorObjectOwned> {
        self.throttle()?;
        let stats = self.gateway.stats().await;

        Ok(StatsResponse {
            shared_size: stats.shared_size,
            priority_size: stats.priority_size,
            in_flight: stats.in_flight,
            dispatch_slots: self.dispatch_slots,
            connected_members: stats.connected_members,
            connections: stats.connections,
            detached_members: stats.detached_members,
            dispatched_total: stats.dispatched_total,
            completed_total: stats.completed_total,
            failed_total: stats.failed_total,
            discarded_total: stats.discarded_total,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }

    /// admin.users.v1
    pub async fn users(&self, _params: UsersRequest) -> Result<UsersResponse, ErrorObjectOwned> {
        self.throttle()?;
        Ok(UsersResponse {
            user_ids: self.gateway.connected_members().await,
        })
    }

    /// queue.position.v1
    pub async fn position(&self, params: PositionRequest) -> Result<PositionResponse, ErrorObjectOwned> {
        self.throttle()?;
        let member_id = parse_member(&params.member_id)?;

        let response = match self.gateway.position(&member_id).await {
            Some(info) => PositionResponse {
                member_id,
                in_queue: true,
                lane: Some(info.lane),
                position: Some(info.position),
                size: Some(info.size),
                dispatched: info.dispatched,
            },
            None => PositionResponse {
                member_id,
                in_queue: false,
                lane: None,
                position: None,
                size: None,
                dispatched: false,
            },
        };
        Ok(response)
    }

    /// queue.evict.v1
    pub async fn evict(&self, params: EvictRequest) -> Result<EvictResponse, ErrorObjectOwned> {
        self.throttle()?;
        let member_id = parse_member(&params.member_id)?;

        let removed = self.gateway.evict(&member_id).await.map_err(to_rpc_error)?;
        info!(member_id = %member_id, lane = %removed.lane, "Member evicted via admin API");

        Ok(EvictResponse {
            member_id,
            lane: removed.lane,
            request_id: removed.request_id,
            evicted: true,
        })
    }
}

fn parse_member(raw: &str) -> Result<MemberId, ErrorObjectOwned> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(validation("memberId cannot be empty"));
    }
    Ok(MemberId::new(trimmed))
}
