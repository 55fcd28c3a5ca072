//! Where login credentials and the channel to join come from.
//!
//! Token acquisition (OAuth flows, identity services) lives outside this
//! crate. The session only needs something that eventually yields an
//! [`Identity`].

use std::future::Future;

use crate::config::Credentials;
use crate::error::Result;

/// What an identity provider hands back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// OAuth token; `None` means log in anonymously.
    pub token: Option<String>,
    /// Account login for the token.
    pub login: Option<String>,
    /// Channel to join (usually the user's own).
    pub channel: String,
}

impl Identity {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            token: self.token.clone(),
            login: self.login.clone(),
        }
    }
}

/// Supplies an [`Identity`], possibly after network round trips.
pub trait IdentityProvider: Send + Sync {
    fn identity(&self) -> impl Future<Output = Result<Identity>> + Send;
}

/// Provider that returns a fixed identity.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub Identity);

impl StaticIdentity {
    pub fn anonymous(channel: impl Into<String>) -> Self {
        Self(Identity {
            channel: channel.into(),
            ..Default::default()
        })
    }
}

impl IdentityProvider for StaticIdentity {
    async fn identity(&self) -> Result<Identity> {
        Ok(self.0.clone())
    }
}
