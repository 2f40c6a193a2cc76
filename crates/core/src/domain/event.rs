//! Wire events exchanged with queue clients.
//!
//! Frames are JSON objects `{"event": <name>, "data": {...}}`.

use crate::domain::book::{BookArtifact, BookRequest};
use crate::domain::member::{Lane, MemberId, RequestId};
use serde::{Deserialize, Serialize};

/// Client -> server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Join a lane (defaults to the plan's lane)
    #[serde(rename_all = "camelCase")]
    Join {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lane: Option<Lane>,
        request: BookRequest,
    },
    /// Leave the queue
    Leave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lane: Option<Lane>,
    },
    /// Ask for the current position
    Check {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lane: Option<Lane>,
    },
}

/// Status reported in `queueStatus` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueStatus {
    Queued,
    AlreadyInQueue,
    Processed,
    Checked,
    Left,
}

/// Error codes carried by `error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    MalformedEvent,
    InvalidPayload,
    LaneNotEligible,
    RateLimited,
    Unauthorized,
    Internal,
}

/// Server -> client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Connected member ids
    #[serde(rename_all = "camelCase")]
    Users { user_ids: Vec<MemberId> },

    /// Lane size, sent to every connection
    #[serde(rename_all = "camelCase")]
    QueueSize { lane: Lane, size: usize },

    /// Outcome of a join/leave/check, or processed notice
    #[serde(rename_all = "camelCase")]
    QueueStatus {
        lane: Lane,
        status: QueueStatus,
        member_id: MemberId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },

    /// Position broadcast for a waiting member
    #[serde(rename_all = "camelCase")]
    PositionUpdate {
        lane: Lane,
        size: usize,
        position_in_queue: usize,
    },

    #[serde(rename_all = "camelCase")]
    DispatchStarted { lane: Lane, request_id: RequestId },

    #[serde(rename_all = "camelCase")]
    DispatchCompleted {
        request_id: RequestId,
        artifact: BookArtifact,
    },

    #[serde(rename_all = "camelCase")]
    DispatchFailed { request_id: RequestId, reason: String },

    #[serde(rename_all = "camelCase")]
    Error { code: ErrorCode, message: String },
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }

    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Users { .. } => "users",
            ServerEvent::QueueSize { .. } => "queueSize",
            ServerEvent::QueueStatus { .. } => "queueStatus",
            ServerEvent::PositionUpdate { .. } => "positionUpdate",
            ServerEvent::DispatchStarted { .. } => "dispatchStarted",
            ServerEvent::DispatchCompleted { .. } => "dispatchCompleted",
            ServerEvent::DispatchFailed { .. } => "dispatchFailed",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Snapshot events that a later event of the same kind supersedes.
    /// Transports may shed these under backpressure; every other event
    /// is sent once and must reach the client.
    pub fn is_droppable(&self) -> bool {
        matches!(
            self,
            ServerEvent::Users { .. } | ServerEvent::QueueSize { .. } | ServerEvent::PositionUpdate { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_join_frame() {
        let frame = json!({
            "event": "join",
            "data": {
                "lane": "shared",
                "request": {
                    "name": "n", "author": "a", "title": "t", "topic": "p",
                    "targetAudience": "all", "numChapters": 2, "numSections": 1
                }
            }
        });

        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        match event {
            ClientEvent::Join { lane, request } => {
                assert_eq!(lane, Some(Lane::Shared));
                assert_eq!(request.title, "t");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_client_leave_without_lane() {
        let event: ClientEvent =
            serde_json::from_value(json!({"event": "leave", "data": {}})).unwrap();
        assert_eq!(event, ClientEvent::Leave { lane: None });
    }

    #[test]
    fn test_unknown_client_event_rejected() {
        let result = serde_json::from_value::<ClientEvent>(json!({"event": "explode", "data": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_position_update_wire_shape() {
        let event = ServerEvent::PositionUpdate {
            lane: Lane::Shared,
            size: 1,
            position_in_queue: 1,
        };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "positionUpdate", "data": {"lane": "shared", "size": 1, "positionInQueue": 1}})
        );
        assert_eq!(event.name(), "positionUpdate");
    }

    #[test]
    fn test_queue_status_omits_missing_position() {
        let event = ServerEvent::QueueStatus {
            lane: Lane::Priority,
            status: QueueStatus::Checked,
            member_id: MemberId::new("u1"),
            position: None,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["status"], "checked");
        assert_eq!(value["data"]["memberId"], "u1");
        assert!(value["data"].get("position").is_none());
    }
}
