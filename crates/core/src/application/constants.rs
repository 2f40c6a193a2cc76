// Queue constants (no magic values)
use std::time::Duration;

/// Concurrent generation jobs when not configured
pub const DEFAULT_DISPATCH_SLOTS: usize = 1;

/// Grace before a disconnected member's waiting entry is dropped.
/// 0 = drop immediately, like an explicit leave.
pub const DEFAULT_DISCONNECT_GRACE_MS: i64 = 0;

/// How often detached entries are checked for expiry
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Fallback poll while the dispatcher idles (covers a missed wake-up)
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on waiting for running jobs during shutdown
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
