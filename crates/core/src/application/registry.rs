// Member Registry - connections grouped by logical member

use crate::domain::{ConnectionId, Identity, MemberId};
use std::collections::{BTreeMap, HashMap};

/// Tracks live connections and the member each belongs to.
///
/// A member may hold several connections (several tabs or devices).
#[derive(Debug, Default)]
pub struct MemberRegistry {
    connections: HashMap<ConnectionId, Identity>,
    members: BTreeMap<MemberId, Vec<ConnectionId>>,
    /// Members whose last connection closed while they still had a queue entry
    detached: HashMap<MemberId, i64>,
}

impl MemberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns true if the member was offline before.
    pub fn add(&mut self, connection: ConnectionId, identity: Identity) -> bool {
        let conns = self.members.entry(identity.member_id.clone()).or_default();
        let first = conns.is_empty();
        if !conns.contains(&connection) {
            conns.push(connection.clone());
        }
        self.connections.insert(connection, identity);
        first
    }

    /// Unregister a connection, returning its identity and how many
    /// connections the member still holds.
    pub fn remove(&mut self, connection: &ConnectionId) -> Option<(Identity, usize)> {
        let identity = self.connections.remove(connection)?;

        let remaining = match self.members.get_mut(&identity.member_id) {
            Some(conns) => {
                conns.retain(|c| c != connection);
                conns.len()
            }
            None => 0,
        };
        if remaining == 0 {
            self.members.remove(&identity.member_id);
        }

        Some((identity, remaining))
    }

    pub fn identity(&self, connection: &ConnectionId) -> Option<&Identity> {
        self.connections.get(connection)
    }

    /// Live connections of a member, oldest first
    pub fn connections_of(&self, member_id: &MemberId) -> &[ConnectionId] {
        self.members
            .get(member_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn all_connections(&self) -> impl Iterator<Item = &ConnectionId> {
        self.connections.keys()
    }

    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members.keys().cloned().collect()
    }

    pub fn is_online(&self, member_id: &MemberId) -> bool {
        self.members.contains_key(member_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn mark_detached(&mut self, member_id: MemberId, at_millis: i64) {
        self.detached.insert(member_id, at_millis);
    }

    /// Returns true if the member was detached
    pub fn clear_detached(&mut self, member_id: &MemberId) -> bool {
        self.detached.remove(member_id).is_some()
    }

    pub fn detached_count(&self) -> usize {
        self.detached.len()
    }

    /// Members detached at or before `cutoff_millis`
    pub fn detached_before(&self, cutoff_millis: i64) -> Vec<MemberId> {
        let mut expired: Vec<MemberId> = self
            .detached
            .iter()
            .filter(|(_, at)| **at <= cutoff_millis)
            .map(|(m, _)| m.clone())
            .collect();
        expired.sort();
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Plan;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[test]
    fn test_multiple_connections_per_member() {
        let mut registry = MemberRegistry::new();
        assert!(registry.add(conn("c1"), Identity::new("u1", Plan::Free)));
        assert!(!registry.add(conn("c2"), Identity::new("u1", Plan::Free)));
        assert!(registry.add(conn("c3"), Identity::new("u2", Plan::Paid)));

        assert_eq!(registry.member_count(), 2);
        assert_eq!(registry.connection_count(), 3);
        assert_eq!(
            registry.connections_of(&MemberId::new("u1")),
            &[conn("c1"), conn("c2")]
        );
        assert_eq!(
            registry.member_ids(),
            vec![MemberId::new("u1"), MemberId::new("u2")]
        );
    }

    #[test]
    fn test_remove_reports_remaining() {
        let mut registry = MemberRegistry::new();
        registry.add(conn("c1"), Identity::new("u1", Plan::Free));
        registry.add(conn("c2"), Identity::new("u1", Plan::Free));

        let (identity, remaining) = registry.remove(&conn("c1")).unwrap();
        assert_eq!(identity.member_id, MemberId::new("u1"));
        assert_eq!(remaining, 1);
        assert!(registry.is_online(&MemberId::new("u1")));

        let (_, remaining) = registry.remove(&conn("c2")).unwrap();
        assert_eq!(remaining, 0);
        assert!(!registry.is_online(&MemberId::new("u1")));
        assert!(registry.connections_of(&MemberId::new("u1")).is_empty());

        assert!(registry.remove(&conn("c2")).is_none());
    }

    #[test]
    fn test_detached_tracking() {
        let mut registry = MemberRegistry::new();
        registry.mark_detached(MemberId::new("a"), 100);
        registry.mark_detached(MemberId::new("b"), 300);

        assert_eq!(registry.detached_before(200), vec![MemberId::new("a")]);
        assert!(registry.clear_detached(&MemberId::new("a")));
        assert!(!registry.clear_detached(&MemberId::new("a")));
        assert_eq!(registry.detached_before(300), vec![MemberId::new("b")]);
    }
}
