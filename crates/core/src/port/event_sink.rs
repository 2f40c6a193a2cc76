// Event Sink Port
// Outbound delivery of server events, addressed by connection

use crate::domain::{ConnectionId, ServerEvent};

/// Delivers events to live transport connections.
///
/// Called while the queue lock is held: implementations must not block.
pub trait EventSink: Send + Sync {
    /// Queue `event` for `connection`. Returns false if the connection is gone.
    fn send(&self, connection: &ConnectionId, event: &ServerEvent) -> bool;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records every delivered event; connections can be marked closed
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<(ConnectionId, ServerEvent)>>,
        closed: Mutex<HashSet<ConnectionId>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Subsequent sends to this connection fail
        pub fn close(&self, connection: &ConnectionId) {
            self.closed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(connection.clone());
        }

        pub fn all(&self) -> Vec<(ConnectionId, ServerEvent)> {
            self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        /// Events delivered to one connection, in order
        pub fn for_connection(&self, connection: &str) -> Vec<ServerEvent> {
            self.all()
                .into_iter()
                .filter(|(c, _)| c.as_str() == connection)
                .map(|(_, e)| e)
                .collect()
        }

        /// Events with the given wire name delivered to one connection
        pub fn named(&self, connection: &str, name: &str) -> Vec<ServerEvent> {
            self.for_connection(connection)
                .into_iter()
                .filter(|e| e.name() == name)
                .collect()
        }

        pub fn clear(&self) {
            self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    impl EventSink for RecordingSink {
        fn send(&self, connection: &ConnectionId, event: &ServerEvent) -> bool {
            if self
                .closed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(connection)
            {
                return false;
            }
            self.events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((connection.clone(), event.clone()));
            true
        }
    }
}
