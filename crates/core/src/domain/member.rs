// Member Domain Model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical member identity (stable per user, independent of connections)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport connection identifier (one per socket)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation request identifier (one per accepted join)
pub type RequestId = String;

/// Admission lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lane {
    Shared,
    Priority,
}

impl Lane {
    /// Lanes in dispatch precedence order
    pub const PRECEDENCE: [Lane; 2] = [Lane::Priority, Lane::Shared];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Shared => "shared",
            Lane::Priority => "priority",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription tier, supplied by the identity collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Plan {
    Free,
    Paid,
}

impl Plan {
    /// Parse a plan name as the auth service reports it.
    ///
    /// Missing or "free" plans map to `Free`; any other named plan is a paid tier.
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(|s| s.trim().to_ascii_lowercase()) {
            None => Plan::Free,
            Some(s) if s.is_empty() || s == "free" => Plan::Free,
            Some(_) => Plan::Paid,
        }
    }

    /// The only lane this plan may join
    pub fn lane(&self) -> Lane {
        match self {
            Plan::Free => Lane::Shared,
            Plan::Paid => Lane::Priority,
        }
    }
}

/// Resolved identity of a connecting client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub member_id: MemberId,
    pub plan: Plan,
}

impl Identity {
    pub fn new(member_id: impl Into<String>, plan: Plan) -> Self {
        Self {
            member_id: MemberId::new(member_id),
            plan,
        }
    }

    pub fn lane(&self) -> Lane {
        self.plan.lane()
    }
}
