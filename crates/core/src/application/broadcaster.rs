// Position Broadcaster - fan-out of queue state to live connections

use crate::application::registry::MemberRegistry;
use crate::domain::{ConnectionId, Lane, MemberId, QueueStore, ServerEvent};
use crate::port::EventSink;
use std::sync::Arc;
use tracing::debug;

/// Pushes position, size and per-member events through the event sink.
///
/// Stateless: every call reads the store and registry it is given.
pub struct PositionBroadcaster {
    sink: Arc<dyn EventSink>,
}

impl PositionBroadcaster {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Recompute positions after a lane mutation.
    ///
    /// Every member of the lane with a live connection gets a
    /// `positionUpdate`; every connection gets the lane size.
    /// Returns the number of members reached.
    pub fn lane_changed(&self, store: &QueueStore, registry: &MemberRegistry, lane: Lane) -> usize {
        let size = store.size(lane);
        let mut reached = 0;

        for (idx, member) in store.members(lane).enumerate() {
            let event = ServerEvent::PositionUpdate {
                lane,
                size,
                position_in_queue: idx + 1,
            };
            if self.to_member(registry, &member.member_id, &event) > 0 {
                reached += 1;
            }
        }

        self.to_all(registry, &ServerEvent::QueueSize { lane, size });

        debug!(lane = %lane, size, reached, "Lane positions broadcast");
        reached
    }

    /// Replay a member's current position to one connection (reconnect)
    pub fn replay(&self, store: &QueueStore, member_id: &MemberId, connection: &ConnectionId) -> bool {
        let (Some(lane), Some(position)) = (store.lane_of(member_id), store.position_of(member_id))
        else {
            return false;
        };

        let event = ServerEvent::PositionUpdate {
            lane,
            size: store.size(lane),
            position_in_queue: position,
        };
        self.sink.send(connection, &event)
    }

    /// Send to every live connection of a member; returns deliveries
    pub fn to_member(&self, registry: &MemberRegistry, member_id: &MemberId, event: &ServerEvent) -> usize {
        registry
            .connections_of(member_id)
            .iter()
            .filter(|conn| self.sink.send(conn, event))
            .count()
    }

    pub fn to_connection(&self, connection: &ConnectionId, event: &ServerEvent) -> bool {
        self.sink.send(connection, event)
    }

    pub fn to_all(&self, registry: &MemberRegistry, event: &ServerEvent) -> usize {
        registry
            .all_connections()
            .filter(|conn| self.sink.send(conn, event))
            .count()
    }
}
