// Application Layer - Queue use cases

pub mod broadcaster;
pub mod constants;
pub mod dispatcher;
pub mod gateway;
pub mod rate_limiter;
pub mod registry;
mod shutdown;
pub mod sweeper;

// Re-exports
pub use broadcaster::PositionBroadcaster;
pub use dispatcher::Dispatcher;
pub use gateway::{
    ConnectionPhase, DispatchOutcome, DispatchTicket, GatewayConfig, PositionInfo, QueueGateway,
    QueueStats, Settlement,
};
pub use rate_limiter::RateLimiter;
pub use registry::MemberRegistry;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use sweeper::DetachedSweeper;
