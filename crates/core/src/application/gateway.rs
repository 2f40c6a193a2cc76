//! Queue Gateway - transport-independent connection state machine.
//!
//! Every inbound event (join, leave, check, connect, disconnect) and every
//! dispatcher transition goes through one lock, so queue mutations are
//! serialized. Outbound events go through the [`EventSink`] without awaiting.
//!
//! Per connection: `Disconnected -> Connected -> (Idle | InQueue) -> Disconnected`.

use crate::application::broadcaster::PositionBroadcaster;
use crate::application::constants::DEFAULT_DISCONNECT_GRACE_MS;
use crate::application::registry::MemberRegistry;
use crate::domain::{
    BookArtifact, BookRequest, ConnectionId, DomainError, ErrorCode, Identity, Lane, MemberId,
    QueueMember, QueueStatus, QueueStore, RequestId, ServerEvent,
};
use crate::error::{AppError, Result};
use crate::port::{EventSink, IdProvider, TimeProvider};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a waiting entry survives its member's last disconnect.
    /// 0 removes it immediately, exactly like a leave.
    pub disconnect_grace_ms: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            disconnect_grace_ms: DEFAULT_DISCONNECT_GRACE_MS,
        }
    }
}

/// Phase of a single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Idle,
    InQueue(Lane),
}

/// A request claimed by the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchTicket {
    pub request_id: RequestId,
    pub member_id: MemberId,
    pub lane: Lane,
    pub request: BookRequest,
    pub started_at: i64,
}

/// Result of a generation run
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Completed(BookArtifact),
    Failed(String),
}

/// What happened to a settled dispatch's result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Result delivered to this many connections
    Delivered(usize),
    /// Member left the queue before the result arrived
    DiscardedLeft,
    /// Member has no live connection
    DiscardedOffline,
    /// Member is online but no connection accepted the result
    DiscardedUndeliverable,
}

/// Position of a member (admin queries)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub lane: Lane,
    pub position: usize,
    pub size: usize,
    pub dispatched: bool,
}

/// Gateway statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub shared_size: usize,
    pub priority_size: usize,
    pub in_flight: usize,
    pub connected_members: usize,
    pub connections: usize,
    pub detached_members: usize,
    pub dispatched_total: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub discarded_total: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: u64,
    completed: u64,
    failed: u64,
    discarded: u64,
}

#[derive(Debug, Default)]
struct GatewayState {
    store: QueueStore,
    registry: MemberRegistry,
    /// request id -> member, for every running generation
    in_flight: HashMap<RequestId, MemberId>,
    counters: Counters,
}

/// Queue Gateway (single serialization point for all queue state)
pub struct QueueGateway {
    state: Mutex<GatewayState>,
    broadcaster: PositionBroadcaster,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    wake: Notify,
    config: GatewayConfig,
}

impl QueueGateway {
    pub fn new(
        sink: Arc<dyn EventSink>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            state: Mutex::new(GatewayState::default()),
            broadcaster: PositionBroadcaster::new(sink),
            id_provider,
            time_provider,
            wake: Notify::new(),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Allocate an id for a new transport connection
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.id_provider.generate_id())
    }

    /// Resolves once new work may be available for the dispatcher
    pub async fn work_available(&self) {
        self.wake.notified().await;
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Register a connection; re-associates an existing queue entry (reconnect)
    pub async fn on_connect(&self, connection: ConnectionId, identity: Identity) {
        let mut state = self.state.lock().await;
        let member_id = identity.member_id.clone();
        state.registry.add(connection.clone(), identity);

        info!(member_id = %member_id, connection_id = %connection, "Connection registered");

        let state = &mut *state;
        if state.store.lane_of(&member_id).is_some() {
            let was_detached = state.registry.clear_detached(&member_id);
            state.store.reassociate(&member_id, Some(connection.clone()));
            self.broadcaster.replay(&state.store, &member_id, &connection);
            self.send_status(
                &state.store,
                &connection,
                &member_id,
                QueueStatus::Queued,
            );
            info!(
                member_id = %member_id,
                connection_id = %connection,
                was_detached,
                "Queue entry re-associated with new connection"
            );
        }

        for lane in Lane::PRECEDENCE {
            self.broadcaster.to_connection(
                &connection,
                &ServerEvent::QueueSize {
                    lane,
                    size: state.store.size(lane),
                },
            );
        }

        self.broadcast_users(&state.registry);
    }

    /// Unregister a connection.
    ///
    /// On the member's last connection the waiting entry is removed (no
    /// grace) or detached until the sweeper expires it. A running
    /// generation is never cancelled.
    pub async fn on_disconnect(&self, connection: &ConnectionId) -> Option<Identity> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let Some((identity, remaining)) = state.registry.remove(connection) else {
            debug!(connection_id = %connection, "Disconnect for unknown connection ignored");
            return None;
        };
        let member_id = identity.member_id.clone();

        info!(
            member_id = %member_id,
            connection_id = %connection,
            remaining,
            "Connection closed"
        );

        if let Some(entry) = state.store.get(&member_id) {
            let owned_by_closed = entry.connection_id.as_ref() == Some(connection);

            if remaining > 0 {
                if owned_by_closed {
                    let next = state.registry.connections_of(&member_id).first().cloned();
                    state.store.reassociate(&member_id, next);
                }
            } else if self.config.disconnect_grace_ms <= 0 {
                let generating = state.store.is_dispatched(&member_id);
                if let Ok(removed) = state.store.remove(&member_id) {
                    if generating {
                        info!(member_id = %member_id, "Member disconnected during generation; result will be discarded");
                    }
                    info!(
                        member_id = %member_id,
                        lane = %removed.lane,
                        "Queue entry removed on disconnect"
                    );
                    self.broadcaster
                        .lane_changed(&state.store, &state.registry, removed.lane);
                }
            } else {
                state.store.reassociate(&member_id, None);
                state
                    .registry
                    .mark_detached(member_id.clone(), self.time_provider.now_millis());
                info!(
                    member_id = %member_id,
                    grace_ms = self.config.disconnect_grace_ms,
                    "Queue entry detached, awaiting reconnect"
                );
            }
        }

        self.broadcast_users(&state.registry);
        Some(identity)
    }

    /// Current phase of a connection
    pub async fn connection_phase(&self, connection: &ConnectionId) -> ConnectionPhase {
        let state = self.state.lock().await;
        match state.registry.identity(connection) {
            None => ConnectionPhase::Disconnected,
            Some(identity) => match state.store.lane_of(&identity.member_id) {
                Some(lane) => ConnectionPhase::InQueue(lane),
                None => ConnectionPhase::Idle,
            },
        }
    }

    // ------------------------------------------------------------------
    // Inbound queue events
    // ------------------------------------------------------------------

    /// Join the member's lane. Returns the position on success.
    ///
    /// `AlreadyQueued`, `LaneNotEligible` and `InvalidPayload` are reported
    /// to the connection as events and returned as errors.
    pub async fn on_join(
        &self,
        connection: &ConnectionId,
        lane: Option<Lane>,
        request: BookRequest,
    ) -> Result<usize> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let identity = state
            .registry
            .identity(connection)
            .cloned()
            .ok_or_else(|| AppError::UnknownConnection(connection.clone()))?;
        let allowed = identity.lane();

        if let Some(requested) = lane {
            if requested != allowed {
                let err = DomainError::LaneNotEligible { requested, allowed };
                self.broadcaster.to_connection(
                    connection,
                    &ServerEvent::error(ErrorCode::LaneNotEligible, err.to_string()),
                );
                return Err(err.into());
            }
        }

        if let Err(err) = request.validate() {
            self.broadcaster.to_connection(
                connection,
                &ServerEvent::error(ErrorCode::InvalidPayload, err.to_string()),
            );
            return Err(err.into());
        }

        let member = QueueMember::new(
            self.id_provider.generate_id(),
            identity.member_id.clone(),
            Some(connection.clone()),
            allowed,
            request,
            self.time_provider.now_millis(),
        );
        let request_id = member.request_id.clone();

        match state.store.enqueue(member) {
            Ok(position) => {
                state.registry.clear_detached(&identity.member_id);
                info!(
                    member_id = %identity.member_id,
                    request_id = %request_id,
                    lane = %allowed,
                    position,
                    "Member joined queue"
                );
                self.broadcaster.to_member(
                    &state.registry,
                    &identity.member_id,
                    &ServerEvent::QueueStatus {
                        lane: allowed,
                        status: QueueStatus::Queued,
                        member_id: identity.member_id.clone(),
                        position: Some(position),
                    },
                );
                self.broadcaster
                    .lane_changed(&state.store, &state.registry, allowed);
                self.wake.notify_one();
                Ok(position)
            }
            Err(err) => {
                debug!(member_id = %identity.member_id, error = %err, "Join rejected");
                self.send_status(
                    &state.store,
                    connection,
                    &identity.member_id,
                    QueueStatus::AlreadyInQueue,
                );
                Err(err.into())
            }
        }
    }

    /// Leave the queue. `NotFound` is an idempotent no-op for the caller.
    ///
    /// With an explicit lane only an entry in that lane is removed.
    pub async fn on_leave(&self, connection: &ConnectionId, lane: Option<Lane>) -> Result<QueueMember> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let member_id = state
            .registry
            .identity(connection)
            .map(|i| i.member_id.clone())
            .ok_or_else(|| AppError::UnknownConnection(connection.clone()))?;

        if let Some(requested) = lane {
            if state.store.lane_of(&member_id) != Some(requested) {
                debug!(member_id = %member_id, lane = %requested, "Leave for a lane the member is not in");
                return Err(DomainError::NotFound(member_id).into());
            }
        }

        let removed = self.remove_and_notify(state, &member_id, "leave")?;
        Ok(removed)
    }

    /// Report the member's position to the asking connection
    pub async fn on_check(&self, connection: &ConnectionId, lane: Option<Lane>) -> Result<Option<usize>> {
        let state = self.state.lock().await;

        let identity = state
            .registry
            .identity(connection)
            .ok_or_else(|| AppError::UnknownConnection(connection.clone()))?;
        let member_id = identity.member_id.clone();

        let queued_lane = state.store.lane_of(&member_id);
        let position = match (lane, queued_lane) {
            (Some(asked), Some(actual)) if asked != actual => None,
            _ => state.store.position_of(&member_id),
        };
        let reported_lane = match position {
            Some(_) => queued_lane.unwrap_or_else(|| identity.lane()),
            None => lane.unwrap_or_else(|| identity.lane()),
        };

        self.broadcaster.to_connection(
            connection,
            &ServerEvent::QueueStatus {
                lane: reported_lane,
                status: QueueStatus::Checked,
                member_id,
                position,
            },
        );
        Ok(position)
    }

    // ------------------------------------------------------------------
    // Dispatcher hooks
    // ------------------------------------------------------------------

    /// Claim the next eligible request (priority lane first).
    ///
    /// Members already running a generation are skipped.
    pub async fn begin_dispatch(&self) -> Option<DispatchTicket> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let busy: HashSet<&MemberId> = state.in_flight.values().collect();
        let claimed = state
            .store
            .dequeue_next_where(|m| !busy.contains(&m.member_id))?;

        let ticket = DispatchTicket {
            request_id: claimed.request_id.clone(),
            member_id: claimed.member_id.clone(),
            lane: claimed.lane,
            request: claimed.payload,
            started_at: self.time_provider.now_millis(),
        };

        state
            .in_flight
            .insert(ticket.request_id.clone(), ticket.member_id.clone());
        state.counters.dispatched += 1;

        info!(
            member_id = %ticket.member_id,
            request_id = %ticket.request_id,
            lane = %ticket.lane,
            "Dispatch started"
        );

        self.broadcaster.to_member(
            &state.registry,
            &ticket.member_id,
            &ServerEvent::DispatchStarted {
                lane: ticket.lane,
                request_id: ticket.request_id.clone(),
            },
        );
        self.broadcaster
            .lane_changed(&state.store, &state.registry, ticket.lane);

        Some(ticket)
    }

    /// Settle a dispatch: remove the entry and deliver the result if the
    /// member is still queued and connected.
    pub async fn finish_dispatch(&self, ticket: &DispatchTicket, outcome: DispatchOutcome) -> Settlement {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        state.in_flight.remove(&ticket.request_id);
        match &outcome {
            DispatchOutcome::Completed(_) => state.counters.completed += 1,
            DispatchOutcome::Failed(_) => state.counters.failed += 1,
        }

        // A settled slot may unblock a member who re-joined meanwhile
        self.wake.notify_one();

        let elapsed_ms = self.time_provider.now_millis() - ticket.started_at;

        let Some(removed) = state.store.remove_request(&ticket.request_id) else {
            state.counters.discarded += 1;
            info!(
                member_id = %ticket.member_id,
                request_id = %ticket.request_id,
                elapsed_ms,
                "Result discarded: member left the queue during generation"
            );
            return Settlement::DiscardedLeft;
        };

        state.registry.clear_detached(&removed.member_id);
        self.broadcaster
            .lane_changed(&state.store, &state.registry, removed.lane);

        if !state.registry.is_online(&removed.member_id) {
            state.counters.discarded += 1;
            info!(
                member_id = %removed.member_id,
                request_id = %ticket.request_id,
                elapsed_ms,
                "Result discarded: member has no live connection"
            );
            return Settlement::DiscardedOffline;
        }

        let result_event = match outcome {
            DispatchOutcome::Completed(artifact) => {
                info!(
                    member_id = %removed.member_id,
                    request_id = %ticket.request_id,
                    elapsed_ms,
                    "Dispatch completed"
                );
                ServerEvent::DispatchCompleted {
                    request_id: ticket.request_id.clone(),
                    artifact,
                }
            }
            DispatchOutcome::Failed(reason) => {
                warn!(
                    member_id = %removed.member_id,
                    request_id = %ticket.request_id,
                    elapsed_ms,
                    reason = %reason,
                    "Dispatch failed"
                );
                ServerEvent::DispatchFailed {
                    request_id: ticket.request_id.clone(),
                    reason,
                }
            }
        };

        let delivered = self
            .broadcaster
            .to_member(&state.registry, &removed.member_id, &result_event);
        if delivered == 0 {
            state.counters.discarded += 1;
            warn!(
                member_id = %removed.member_id,
                request_id = %ticket.request_id,
                event = result_event.name(),
                "Result discarded: no connection accepted it"
            );
            return Settlement::DiscardedUndeliverable;
        }
        self.broadcaster.to_member(
            &state.registry,
            &removed.member_id,
            &ServerEvent::QueueStatus {
                lane: removed.lane,
                status: QueueStatus::Processed,
                member_id: removed.member_id.clone(),
                position: None,
            },
        );

        Settlement::Delivered(delivered)
    }

    // ------------------------------------------------------------------
    // Maintenance & admin
    // ------------------------------------------------------------------

    /// Remove entries whose members stayed disconnected past the grace
    pub async fn sweep_detached(&self) -> usize {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let cutoff = self.time_provider.now_millis() - self.config.disconnect_grace_ms;
        let expired = state.registry.detached_before(cutoff);

        let mut lanes: Vec<Lane> = Vec::new();
        let mut removed_count = 0;
        for member_id in expired {
            state.registry.clear_detached(&member_id);
            if state.registry.is_online(&member_id) {
                continue;
            }
            if let Ok(removed) = state.store.remove(&member_id) {
                info!(member_id = %member_id, lane = %removed.lane, "Detached queue entry expired");
                if !lanes.contains(&removed.lane) {
                    lanes.push(removed.lane);
                }
                removed_count += 1;
            }
        }

        for lane in Lane::PRECEDENCE {
            if lanes.contains(&lane) {
                self.broadcaster.lane_changed(&state.store, &state.registry, lane);
            }
        }
        removed_count
    }

    /// Administrative removal of a member's entry
    pub async fn evict(&self, member_id: &MemberId) -> Result<QueueMember> {
        let mut guard = self.state.lock().await;
        self.remove_and_notify(&mut guard, member_id, "evict")
    }

    pub async fn position(&self, member_id: &MemberId) -> Option<PositionInfo> {
        let state = self.state.lock().await;
        let lane = state.store.lane_of(member_id)?;
        Some(PositionInfo {
            lane,
            position: state.store.position_of(member_id)?,
            size: state.store.size(lane),
            dispatched: state.store.is_dispatched(member_id),
        })
    }

    pub async fn connected_members(&self) -> Vec<MemberId> {
        self.state.lock().await.registry.member_ids()
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            shared_size: state.store.size(Lane::Shared),
            priority_size: state.store.size(Lane::Priority),
            in_flight: state.in_flight.len(),
            connected_members: state.registry.member_count(),
            connections: state.registry.connection_count(),
            detached_members: state.registry.detached_count(),
            dispatched_total: state.counters.dispatched,
            completed_total: state.counters.completed,
            failed_total: state.counters.failed,
            discarded_total: state.counters.discarded,
        }
    }

    // ------------------------------------------------------------------
    // Helpers (caller holds the lock)
    // ------------------------------------------------------------------

    fn remove_and_notify(
        &self,
        state: &mut GatewayState,
        member_id: &MemberId,
        reason: &'static str,
    ) -> Result<QueueMember> {
        let removed = state.store.remove(member_id).map_err(|err| {
            debug!(member_id = %member_id, reason, "Removal of absent member ignored");
            AppError::from(err)
        })?;
        state.registry.clear_detached(member_id);

        if state.in_flight.contains_key(&removed.request_id) {
            info!(
                member_id = %member_id,
                request_id = %removed.request_id,
                "Member left during generation; result will be discarded"
            );
        }
        info!(member_id = %member_id, lane = %removed.lane, reason, "Member left queue");

        self.broadcaster.to_member(
            &state.registry,
            member_id,
            &ServerEvent::QueueStatus {
                lane: removed.lane,
                status: QueueStatus::Left,
                member_id: member_id.clone(),
                position: None,
            },
        );
        self.broadcaster
            .lane_changed(&state.store, &state.registry, removed.lane);
        Ok(removed)
    }

    fn send_status(
        &self,
        store: &QueueStore,
        connection: &ConnectionId,
        member_id: &MemberId,
        status: QueueStatus,
    ) {
        let Some(lane) = store.lane_of(member_id) else {
            return;
        };
        self.broadcaster.to_connection(
            connection,
            &ServerEvent::QueueStatus {
                lane,
                status,
                member_id: member_id.clone(),
                position: store.position_of(member_id),
            },
        );
    }

    fn broadcast_users(&self, registry: &MemberRegistry) {
        self.broadcaster.to_all(
            registry,
            &ServerEvent::Users {
                user_ids: registry.member_ids(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Plan;
    use crate::port::event_sink::mocks::RecordingSink;
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::time_provider::ManualTimeProvider;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        sink: Arc<RecordingSink>,
        clock: Arc<ManualTimeProvider>,
        gateway: QueueGateway,
    }

    fn fixture(grace_ms: i64) -> Fixture {
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualTimeProvider::new(1_000));
        let gateway = QueueGateway::new(
            sink.clone(),
            Arc::new(SequentialIdProvider::new("req")),
            clock.clone(),
            GatewayConfig {
                disconnect_grace_ms: grace_ms,
            },
        );
        Fixture {
            sink,
            clock,
            gateway,
        }
    }

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    impl Fixture {
        async fn connect(&self, connection: &str, member: &str, plan: Plan) {
            self.gateway
                .on_connect(conn(connection), Identity::new(member, plan))
                .await;
        }

        async fn join(&self, connection: &str) -> Result<usize> {
            self.clock.advance(1);
            self.gateway
                .on_join(&conn(connection), None, BookRequest::sample(connection))
                .await
        }
    }

    #[tokio::test]
    async fn test_join_reports_queued_status() {
        let f = fixture(0);
        f.connect("ca", "a", Plan::Free).await;

        assert_eq!(assert_ok!(f.join("ca").await), 1);
        assert_eq!(
            f.sink.named("ca", "queueStatus"),
            vec![ServerEvent::QueueStatus {
                lane: Lane::Shared,
                status: QueueStatus::Queued,
                member_id: MemberId::new("a"),
                position: Some(1),
            }]
        );
        assert_eq!(
            f.gateway.connection_phase(&conn("ca")).await,
            ConnectionPhase::InQueue(Lane::Shared)
        );
    }

    #[tokio::test]
    async fn test_second_join_is_already_in_queue() {
        let f = fixture(0);
        f.connect("ca", "a", Plan::Paid).await;
        f.join("ca").await.unwrap();

        let err = assert_err!(f.join("ca").await);
        assert!(matches!(
            err,
            AppError::Domain(DomainError::AlreadyQueued { .. })
        ));

        let statuses = f.sink.named("ca", "queueStatus");
        assert_eq!(
            statuses.last(),
            Some(&ServerEvent::QueueStatus {
                lane: Lane::Priority,
                status: QueueStatus::AlreadyInQueue,
                member_id: MemberId::new("a"),
                position: Some(1),
            })
        );
        assert_eq!(f.gateway.stats().await.priority_size, 1);
    }

    #[tokio::test]
    async fn test_join_rejects_ineligible_lane() {
        let f = fixture(0);
        f.connect("ca", "a", Plan::Free).await;

        let err = f
            .gateway
            .on_join(&conn("ca"), Some(Lane::Priority), BookRequest::sample("t"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::LaneNotEligible { .. })
        ));
        assert_eq!(f.sink.named("ca", "error").len(), 1);
        assert_eq!(f.gateway.stats().await.priority_size, 0);
    }

    #[tokio::test]
    async fn test_join_rejects_invalid_payload() {
        let f = fixture(0);
        f.connect("ca", "a", Plan::Free).await;

        let mut request = BookRequest::sample("t");
        request.title.clear();
        let err = f.gateway.on_join(&conn("ca"), None, request).await.unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::InvalidPayload(_))));
        assert_eq!(
            f.gateway.connection_phase(&conn("ca")).await,
            ConnectionPhase::Idle
        );
    }

    #[tokio::test]
    async fn test_unknown_connection_rejected() {
        let f = fixture(0);
        let err = f.join("ghost").await.unwrap_err();
        assert!(matches!(err, AppError::UnknownConnection(_)));
        assert_eq!(
            f.gateway.connection_phase(&conn("ghost")).await,
            ConnectionPhase::Disconnected
        );
    }

    #[tokio::test]
    async fn test_leave_compacts_positions() {
        let f = fixture(0);
        f.connect("ca", "a", Plan::Free).await;
        f.connect("cb", "b", Plan::Free).await;
        f.join("ca").await.unwrap();
        f.join("cb").await.unwrap();
        f.sink.clear();

        let removed = f.gateway.on_leave(&conn("cb"), None).await.unwrap();
        assert_eq!(removed.member_id, MemberId::new("b"));

        assert_eq!(
            f.sink.named("ca", "positionUpdate"),
            vec![ServerEvent::PositionUpdate {
                lane: Lane::Shared,
                size: 1,
                position_in_queue: 1,
            }]
        );
        assert_eq!(
            f.sink.named("cb", "queueStatus"),
            vec![ServerEvent::QueueStatus {
                lane: Lane::Shared,
                status: QueueStatus::Left,
                member_id: MemberId::new("b"),
                position: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_leave_when_absent_is_not_found() {
        let f = fixture(0);
        f.connect("ca", "a", Plan::Free).await;
        f.sink.clear();

        let err = f.gateway.on_leave(&conn("ca"), None).await.unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::NotFound(_))));
        assert!(f.sink.all().is_empty());

        // Leaving a lane the member is not in changes nothing
        f.join("ca").await.unwrap();
        assert!(f
            .gateway
            .on_leave(&conn("ca"), Some(Lane::Priority))
            .await
            .is_err());
        assert_eq!(f.gateway.stats().await.shared_size, 1);
    }

    #[tokio::test]
    async fn test_check_reports_position() {
        let f = fixture(0);
        f.connect("ca", "a", Plan::Free).await;
        f.connect("cb", "b", Plan::Free).await;
        f.join("ca").await.unwrap();
        f.join("cb").await.unwrap();

        assert_eq!(f.gateway.on_check(&conn("cb"), None).await.unwrap(), Some(2));
        assert_eq!(
            f.gateway
                .on_check(&conn("cb"), Some(Lane::Priority))
                .await
                .unwrap(),
            None
        );
        let checks = f.sink.named("cb", "queueStatus");
        assert!(checks.iter().any(|e| matches!(
            e,
            ServerEvent::QueueStatus {
                status: QueueStatus::Checked,
                position: Some(2),
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_users_broadcast_on_connect_and_disconnect() {
        let f = fixture(0);
        f.connect("ca", "a", Plan::Free).await;
        f.connect("cb", "b", Plan::Paid).await;

        assert_eq!(
            f.sink.named("ca", "users").last(),
            Some(&ServerEvent::Users {
                user_ids: vec![MemberId::new("a"), MemberId::new("b")],
            })
        );

        f.gateway.on_disconnect(&conn("cb")).await;
        assert_eq!(
            f.sink.named("ca", "users").last(),
            Some(&ServerEvent::Users {
                user_ids: vec![MemberId::new("a")],
            })
        );
        assert_eq!(f.gateway.connected_members().await, vec![MemberId::new("a")]);
    }

    #[tokio::test]
    async fn test_disconnect_without_grace_removes_entry() {
        let f = fixture(0);
        f.connect("ca", "a", Plan::Free).await;
        f.connect("cb", "b", Plan::Free).await;
        f.join("ca").await.unwrap();
        f.join("cb").await.unwrap();
        f.sink.clear();

        f.gateway.on_disconnect(&conn("ca")).await;

        assert!(f.gateway.position(&MemberId::new("a")).await.is_none());
        assert_eq!(
            f.sink.named("cb", "positionUpdate"),
            vec![ServerEvent::PositionUpdate {
                lane: Lane::Shared,
                size: 1,
                position_in_queue: 1,
            }]
        );
    }

    #[tokio::test]
    async fn test_other_connection_keeps_entry() {
        let f = fixture(0);
        f.connect("tab1", "a", Plan::Free).await;
        f.connect("tab2", "a", Plan::Free).await;
        f.join("tab1").await.unwrap();

        f.gateway.on_disconnect(&conn("tab1")).await;
        assert_eq!(
            f.gateway.connection_phase(&conn("tab2")).await,
            ConnectionPhase::InQueue(Lane::Shared)
        );
    }

    #[tokio::test]
    async fn test_reconnect_within_grace_replays_position() {
        let f = fixture(10_000);
        f.connect("ca", "a", Plan::Free).await;
        f.connect("cb", "b", Plan::Free).await;
        f.join("ca").await.unwrap();
        f.join("cb").await.unwrap();

        f.gateway.on_disconnect(&conn("cb")).await;
        assert_eq!(f.gateway.stats().await.detached_members, 1);

        f.clock.advance(5_000);
        assert_eq!(f.gateway.sweep_detached().await, 0);

        f.connect("cb2", "b", Plan::Free).await;
        assert_eq!(f.gateway.stats().await.detached_members, 0);
        assert_eq!(f.gateway.stats().await.shared_size, 2);
        assert_eq!(
            f.sink.named("cb2", "positionUpdate"),
            vec![ServerEvent::PositionUpdate {
                lane: Lane::Shared,
                size: 2,
                position_in_queue: 2,
            }]
        );
        assert!(f.sink.named("cb2", "queueStatus").iter().any(|e| matches!(
            e,
            ServerEvent::QueueStatus {
                status: QueueStatus::Queued,
                position: Some(2),
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_detached_entry() {
        let f = fixture(10_000);
        f.connect("ca", "a", Plan::Free).await;
        f.connect("cb", "b", Plan::Free).await;
        f.join("ca").await.unwrap();
        f.join("cb").await.unwrap();
        f.gateway.on_disconnect(&conn("ca")).await;
        f.sink.clear();

        f.clock.advance(10_000);
        assert_eq!(f.gateway.sweep_detached().await, 1);
        assert!(f.gateway.position(&MemberId::new("a")).await.is_none());
        assert_eq!(
            f.sink.named("cb", "positionUpdate"),
            vec![ServerEvent::PositionUpdate {
                lane: Lane::Shared,
                size: 1,
                position_in_queue: 1,
            }]
        );
    }

    #[tokio::test]
    async fn test_dispatch_lifecycle() {
        let f = fixture(0);
        f.connect("ca", "a", Plan::Free).await;
        f.connect("cb", "b", Plan::Paid).await;
        f.join("ca").await.unwrap();
        f.join("cb").await.unwrap();

        let ticket = f.gateway.begin_dispatch().await.unwrap();
        assert_eq!(ticket.member_id, MemberId::new("b"));
        assert_eq!(ticket.lane, Lane::Priority);
        assert_eq!(f.sink.named("cb", "dispatchStarted").len(), 1);

        // Dispatched entry still occupies position 1
        let info = f.gateway.position(&MemberId::new("b")).await.unwrap();
        assert!(info.dispatched);
        assert_eq!(info.position, 1);

        let artifact = BookArtifact::new(serde_json::json!({"title": "cb"}));
        let settlement = f
            .gateway
            .finish_dispatch(&ticket, DispatchOutcome::Completed(artifact.clone()))
            .await;
        assert_eq!(settlement, Settlement::Delivered(1));
        assert_eq!(
            f.sink.named("cb", "dispatchCompleted"),
            vec![ServerEvent::DispatchCompleted {
                request_id: ticket.request_id.clone(),
                artifact,
            }]
        );
        assert!(f.gateway.position(&MemberId::new("b")).await.is_none());

        let stats = f.gateway.stats().await;
        assert_eq!(stats.dispatched_total, 1);
        assert_eq!(stats.completed_total, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.shared_size, 1);
    }

    #[tokio::test]
    async fn test_unaccepted_result_counts_as_discarded() {
        let f = fixture(0);
        f.connect("ca", "a", Plan::Free).await;
        f.join("ca").await.unwrap();
        let ticket = f.gateway.begin_dispatch().await.unwrap();

        // Connection is registered but its transport refuses frames
        f.sink.close(&ConnectionId::new("ca"));
        let artifact = BookArtifact::new(serde_json::json!({"title": "ca"}));
        let settlement = f
            .gateway
            .finish_dispatch(&ticket, DispatchOutcome::Completed(artifact))
            .await;
        assert_eq!(settlement, Settlement::DiscardedUndeliverable);

        let stats = f.gateway.stats().await;
        assert_eq!(stats.completed_total, 1);
        assert_eq!(stats.discarded_total, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.shared_size, 0);
    }

    #[tokio::test]
    async fn test_evict_notifies_member() {
        let f = fixture(0);
        f.connect("ca", "a", Plan::Free).await;
        f.join("ca").await.unwrap();

        f.gateway.evict(&MemberId::new("a")).await.unwrap();
        assert!(f.sink.named("ca", "queueStatus").iter().any(|e| matches!(
            e,
            ServerEvent::QueueStatus {
                status: QueueStatus::Left,
                ..
            }
        )));
        assert_err!(f.gateway.evict(&MemberId::new("a")).await);
    }
}
