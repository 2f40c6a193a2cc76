// Identity adapters
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use quill_core::domain::{Identity, MemberId, Plan};
use quill_core::port::{Handshake, IdentityError, IdentityProvider};

/// Trusts the member id claimed in the handshake (development mode).
///
/// The claimed plan is ignored unless [`HandshakeIdentity::trusting_plan`]
/// is used; otherwise every member lands on the free plan.
#[derive(Debug, Default, Clone)]
pub struct HandshakeIdentity {
    trust_plan: bool,
}

impl HandshakeIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also accept the `x-plan` claim, letting clients pick their lane
    pub fn trusting_plan() -> Self {
        Self { trust_plan: true }
    }
}

#[async_trait]
impl IdentityProvider for HandshakeIdentity {
    async fn resolve(&self, handshake: &Handshake) -> Result<Identity, IdentityError> {
        let member_id = handshake
            .member_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| IdentityError::MissingCredentials("member id".to_string()))?;

        let plan = if self.trust_plan {
            Plan::from_name(handshake.plan.as_deref())
        } else {
            Plan::Free
        };
        Ok(Identity {
            member_id: MemberId::new(member_id),
            plan,
        })
    }
}

/// Auth service response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthUser {
    #[serde(alias = "id", alias = "userId")]
    member_id: String,
    #[serde(default)]
    plan: Option<String>,
}

/// Validates the bearer token against the auth service (`GET <url>`)
pub struct HttpIdentityProvider {
    client: Client,
    url: String,
}

impl HttpIdentityProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, IdentityError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn resolve(&self, handshake: &Handshake) -> Result<Identity, IdentityError> {
        let token = handshake
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| IdentityError::MissingCredentials("bearer token".to_string()))?;

        let response = self
            .client
            .get(&self.url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!(url = %self.url, "Token rejected by auth service");
                return Err(IdentityError::Unauthorized("token rejected".to_string()));
            }
            status => {
                warn!(url = %self.url, status = %status, "Auth service error");
                return Err(IdentityError::Unavailable(status.to_string()));
            }
        }

        let user: AuthUser = response
            .json()
            .await
            .map_err(|e| IdentityError::Unavailable(format!("invalid auth response: {}", e)))?;

        // A claimed member id must match the token's owner
        if let Some(claimed) = handshake.member_id.as_deref() {
            if !claimed.is_empty() && claimed != user.member_id {
                return Err(IdentityError::Unauthorized(format!(
                    "token does not belong to {}",
                    claimed
                )));
            }
        }

        Ok(Identity {
            member_id: MemberId::new(user.member_id),
            plan: Plan::from_name(user.plan.as_deref()),
        })
    }
}
