//! RPC Request/Response Types
//!
//! JSON-RPC method parameters and results.

use quill_core::domain::{Lane, MemberId};
use serde::{Deserialize, Serialize};

/// admin.stats.v1 - Queue statistics
#[derive(Debug, Default, Deserialize)]
pub struct StatsRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize, Deserialize)]
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

/// admin.users.v1 - Connected members
#[derive(Debug, Default, Deserialize)]
pub struct UsersRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersResponse {
    pub user_ids: Vec<MemberId>,
}

/// queue.position.v1 - Where is a member?
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRequest {
    pub member_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub member_id: MemberId,
    pub in_queue: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<Lane>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    pub dispatched: bool,
}

/// queue.evict.v1 - Remove a member's entry
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictRequest {
    pub member_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictResponse {
    pub member_id: MemberId,
    pub lane: Lane,
    pub request_id: String,
    pub evicted: bool,
}
