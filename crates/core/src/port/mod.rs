// Port Layer - Interfaces for external collaborators

pub mod event_sink;
pub mod generator;
pub mod id_provider; // For deterministic testing
pub mod identity;
pub mod time_provider;

// Re-exports
pub use event_sink::EventSink;
pub use generator::{BookGenerator, GenerationError};
pub use id_provider::IdProvider;
pub use identity::{Handshake, IdentityError, IdentityProvider};
pub use time_provider::TimeProvider;
