// Domain Error Types

use crate::domain::member::{Lane, MemberId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Member {member_id} already queued in {lane} lane")]
    AlreadyQueued { member_id: MemberId, lane: Lane },

    #[error("Member not queued: {0}")]
    NotFound(MemberId),

    #[error("Invalid book request: {0}")]
    InvalidPayload(String),

    #[error("Lane {requested} not available for this plan (allowed: {allowed})")]
    LaneNotEligible { requested: Lane, allowed: Lane },
}

pub type Result<T> = std::result::Result<T, DomainError>;
