// Domain Layer - Pure queue logic and entities

pub mod book;
pub mod error;
pub mod event;
pub mod member;
pub mod queue;

// Re-exports
pub use book::{BookArtifact, BookRequest};
pub use error::DomainError;
pub use event::{ClientEvent, ErrorCode, QueueStatus, ServerEvent};
pub use member::{ConnectionId, Identity, Lane, MemberId, Plan, RequestId};
pub use queue::{QueueMember, QueueStore};
