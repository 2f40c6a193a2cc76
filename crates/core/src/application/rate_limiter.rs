//! Rate Limiter (Token Bucket Algorithm)
//!
//! Shared by the WebSocket gateway (per connection) and the admin RPC server.
//! Lock-free: a single CAS loop over a packed atomic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Token bucket with millitoken precision
pub struct RateLimiter {
    // Upper 32 bits: millitokens available
    // Lower 32 bits: last refill (ms since creation)
    packed: AtomicU64,
    created: Instant,
    max_millis: u64,
    refill_rate: u32, // tokens per second == millitokens per ms
}

const MILLI: u64 = 1000;
const CLOCK_MASK: u64 = 0xFFFF_FFFF;

/// Milliseconds between two 32-bit clock readings. The packed clock wraps
/// every ~49.7 days; modular subtraction keeps refills correct across it.
fn elapsed_ms(last: u64, now: u64) -> u64 {
    now.wrapping_sub(last) & CLOCK_MASK
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `max_tokens` - Maximum burst size
    /// * `refill_rate` - Tokens added per second
    ///
    /// # Example
    /// Allow 100 requests/sec with burst of 200:
    /// `RateLimiter::new(200, 100)`
    pub fn new(max_tokens: u32, refill_rate: u32) -> Self {
        let max_millis = (max_tokens as u64 * MILLI).min(u32::MAX as u64);
        Self {
            packed: AtomicU64::new(max_millis << 32),
            created: Instant::now(),
            max_millis,
            refill_rate,
        }
    }

    /// Consume one token. Returns false if rate limited.
    pub fn check(&self) -> bool {
        loop {
            let packed = self.packed.load(Ordering::Acquire);
            let millis = packed >> 32;
            let last_refill_ms = packed & CLOCK_MASK;

            let now_ms = (self.created.elapsed().as_millis() as u64) & CLOCK_MASK;
            let delta_ms = elapsed_ms(last_refill_ms, now_ms);
            let available = (millis + delta_ms * self.refill_rate as u64).min(self.max_millis);

            let (remaining, allowed) = if available >= MILLI {
                (available - MILLI, true)
            } else {
                (available, false)
            };

            let next = (remaining << 32) | now_ms;
            match self
                .packed
                .compare_exchange(packed, next, Ordering::Release, Ordering::Acquire)
            {
                Ok(_) => return allowed,
                Err(_) => continue, // Retry
            }
        }
    }

    /// Whole tokens left (for monitoring)
    pub fn remaining(&self) -> u32 {
        ((self.packed.load(Ordering::Acquire) >> 32) / MILLI) as u32
    }
}
