//! Connection Hub - outbound channel per live socket

use quill_core::domain::{ConnectionId, ServerEvent};
use quill_core::port::EventSink;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

/// Outbound frames buffered per connection before snapshot events are shed
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Extra slots per connection that only non-droppable events may fill
pub const CONTROL_RESERVE: usize = 32;

/// Routes serialized server events to each connection's writer task.
///
/// `send` never awaits: it is called while the queue lock is held.
/// Frames share one channel so they keep their order. Snapshot events
/// (`users`, `queueSize`, `positionUpdate`) are shed once the buffer is
/// down to [`CONTROL_RESERVE`] free slots, leaving room for statuses and
/// dispatch results.
pub struct ConnectionHub {
    channels: Mutex<HashMap<ConnectionId, mpsc::Sender<String>>>,
    capacity: usize,
}

impl ConnectionHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<ConnectionId, mpsc::Sender<String>>> {
        // Map stays consistent even if a holder panicked
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open the outbound channel for a new connection
    pub fn register(&self, connection: ConnectionId) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.capacity + CONTROL_RESERVE);
        self.channels().insert(connection, tx);
        rx
    }

    pub fn unregister(&self, connection: &ConnectionId) -> bool {
        self.channels().remove(connection).is_some()
    }

    pub fn len(&self) -> usize {
        self.channels().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}

impl EventSink for ConnectionHub {
    fn send(&self, connection: &ConnectionId, event: &ServerEvent) -> bool {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                error!(event = event.name(), error = %e, "Failed to encode server event");
                return false;
            }
        };

        let mut channels = self.channels();
        let Some(tx) = channels.get(connection) else {
            return false;
        };

        if event.is_droppable() && tx.capacity() <= CONTROL_RESERVE {
            debug!(
                connection_id = %connection,
                event = event.name(),
                "Outbound buffer busy, snapshot event shed"
            );
            return false;
        }

        match tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    connection_id = %connection,
                    event = event.name(),
                    "Outbound buffer full, event dropped"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                channels.remove(connection);
                false
            }
        }
    }
}
