// Identity Port
// Resolves a connecting client into a member identity and plan

use crate::domain::Identity;
use async_trait::async_trait;
use thiserror::Error;

/// Credentials presented during the transport handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Bearer token (without the `Bearer ` prefix)
    pub token: Option<String>,
    /// Claimed member id
    pub member_id: Option<String>,
    /// Claimed plan name
    pub plan: Option<String>,
}

/// Identity resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Identity service unavailable: {0}")]
    Unavailable(String),
}

/// Identity provider trait
///
/// Implementations:
/// - HandshakeIdentity: trusts the handshake claims (development)
/// - HttpIdentityProvider: validates the bearer token with the auth service
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, handshake: &Handshake) -> Result<Identity, IdentityError>;
}
