//! SDK Request/Response Types
//!
//! Mirrors the JSON-RPC types from api-rpc crate.

use quill_core::domain::{Lane, MemberId};
use serde::{Deserialize, Serialize};

/// Queue statistics (admin.stats.v1)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub shared_size: usize,
    pub priority_size: usize,
    pub in_flight: usize,
    pub dispatch_slots: usize,
    pub connected_members: usize,
    pub connections: usize,
    pub detached_members: usize,
    pub dispatched_total: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub discarded_total: u64,
    pub uptime_seconds: u64,
}

/// Connected members (admin.users.v1)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersResponse {
    pub user_ids: Vec<MemberId>,
}

/// Request naming one member (queue.position.v1, queue.evict.v1)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRequest {
    pub member_id: String,
}

/// Response from position lookup
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub member_id: MemberId,
    pub in_queue: bool,
    #[serde(default)]
    pub lane: Option<Lane>,
    #[serde(default)]
    pub position: Option<usize>,
    #[serde(default)]
    pub size: Option<usize>,
    pub dispatched: bool,
}

/// Response from evict operation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictResponse {
    pub member_id: MemberId,
    pub lane: Lane,
    pub request_id: String,
    pub evicted: bool,
}
