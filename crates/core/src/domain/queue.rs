// Queue Domain Model: two independent FIFO lanes
//
// Priority lane drains strictly before the shared lane. A dispatched entry keeps
// its place (it is the one "being generated") until its dispatch settles.

use crate::domain::book::BookRequest;
use crate::domain::error::{DomainError, Result};
use crate::domain::member::{ConnectionId, Lane, MemberId, RequestId};
use serde::Serialize;
use std::collections::VecDeque;

/// A pending generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMember {
    pub request_id: RequestId,
    pub member_id: MemberId,
    /// Connection that last owned this entry (None while detached)
    pub connection_id: Option<ConnectionId>,
    pub lane: Lane,
    pub payload: BookRequest,
    pub enqueued_at: i64, // epoch ms
}

impl QueueMember {
    pub fn new(
        request_id: impl Into<String>,
        member_id: MemberId,
        connection_id: Option<ConnectionId>,
        lane: Lane,
        payload: BookRequest,
        enqueued_at: i64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            member_id,
            connection_id,
            lane,
            payload,
            enqueued_at,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    member: QueueMember,
    dispatched: bool,
}

/// In-memory store for both lanes
///
/// Not synchronized: callers own the single serialization point.
#[derive(Debug, Default)]
pub struct QueueStore {
    shared: VecDeque<Entry>,
    priority: VecDeque<Entry>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, lane: Lane) -> &VecDeque<Entry> {
        match lane {
            Lane::Shared => &self.shared,
            Lane::Priority => &self.priority,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut VecDeque<Entry> {
        match lane {
            Lane::Shared => &mut self.shared,
            Lane::Priority => &mut self.priority,
        }
    }

    fn find(&self, member_id: &MemberId) -> Option<(Lane, usize)> {
        Lane::PRECEDENCE.into_iter().find_map(|lane| {
            self.lane(lane)
                .iter()
                .position(|e| &e.member.member_id == member_id)
                .map(|idx| (lane, idx))
        })
    }

    /// Admit a member into its lane.
    ///
    /// Returns the 1-based position, or `AlreadyQueued` if the member holds an
    /// entry in either lane.
    pub fn enqueue(&mut self, member: QueueMember) -> Result<usize> {
        if let Some((lane, _)) = self.find(&member.member_id) {
            return Err(DomainError::AlreadyQueued {
                member_id: member.member_id,
                lane,
            });
        }

        let queue = self.lane_mut(member.lane);
        let idx = queue.partition_point(|e| e.member.enqueued_at <= member.enqueued_at);
        queue.insert(
            idx,
            Entry {
                member,
                dispatched: false,
            },
        );
        Ok(idx + 1)
    }

    /// Claim the next waiting request (priority lane first, FIFO within a lane)
    pub fn dequeue_next(&mut self) -> Option<QueueMember> {
        self.dequeue_next_where(|_| true)
    }

    /// Claim the next waiting request accepted by `eligible`
    pub fn dequeue_next_where<F>(&mut self, eligible: F) -> Option<QueueMember>
    where
        F: Fn(&QueueMember) -> bool,
    {
        for lane in Lane::PRECEDENCE {
            if let Some(entry) = self
                .lane_mut(lane)
                .iter_mut()
                .find(|e| !e.dispatched && eligible(&e.member))
            {
                entry.dispatched = true;
                return Some(entry.member.clone());
            }
        }
        None
    }

    /// Remove a member from whichever lane holds it
    pub fn remove(&mut self, member_id: &MemberId) -> Result<QueueMember> {
        let (lane, idx) = self
            .find(member_id)
            .ok_or_else(|| DomainError::NotFound(member_id.clone()))?;

        self.lane_mut(lane)
            .remove(idx)
            .map(|e| e.member)
            .ok_or_else(|| DomainError::NotFound(member_id.clone()))
    }

    /// Remove exactly this request (dispatch settlement)
    pub fn remove_request(&mut self, request_id: &str) -> Option<QueueMember> {
        for lane in Lane::PRECEDENCE {
            let queue = self.lane_mut(lane);
            if let Some(idx) = queue.iter().position(|e| e.member.request_id == request_id) {
                return queue.remove(idx).map(|e| e.member);
            }
        }
        None
    }

    /// 1-based rank within the member's own lane
    pub fn position_of(&self, member_id: &MemberId) -> Option<usize> {
        self.find(member_id).map(|(_, idx)| idx + 1)
    }

    pub fn size(&self, lane: Lane) -> usize {
        self.lane(lane).len()
    }

    pub fn len(&self) -> usize {
        self.shared.len() + self.priority.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lane_of(&self, member_id: &MemberId) -> Option<Lane> {
        self.find(member_id).map(|(lane, _)| lane)
    }

    pub fn get(&self, member_id: &MemberId) -> Option<&QueueMember> {
        self.find(member_id)
            .and_then(|(lane, idx)| self.lane(lane).get(idx))
            .map(|e| &e.member)
    }

    /// Whether the member's entry is currently running in a dispatch slot
    pub fn is_dispatched(&self, member_id: &MemberId) -> bool {
        self.find(member_id)
            .and_then(|(lane, idx)| self.lane(lane).get(idx))
            .is_some_and(|e| e.dispatched)
    }

    /// Members of a lane in queue order
    pub fn members(&self, lane: Lane) -> impl Iterator<Item = &QueueMember> {
        self.lane(lane).iter().map(|e| &e.member)
    }

    /// Point a member's entry at another connection (or detach it)
    pub fn reassociate(&mut self, member_id: &MemberId, connection: Option<ConnectionId>) -> bool {
        match self.find(member_id) {
            Some((lane, idx)) => match self.lane_mut(lane).get_mut(idx) {
                Some(entry) => {
                    entry.member.connection_id = connection;
                    true
                }
                None => false,
            },
            None => false,
        }
    }
}
