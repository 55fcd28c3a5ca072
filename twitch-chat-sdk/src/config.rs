//! Connection settings and login credentials.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default Twitch chat server.
pub const DEFAULT_ADDRESS: &str = "irc.chat.twitch.tv";
/// Default plaintext IRC port.
pub const DEFAULT_PORT: u16 = 6667;

/// Settings for connecting to the chat server.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name.
    pub address: String,
    /// Server port.
    pub port: u16,
    /// Capacity of the socket read buffer, in bytes.
    pub read_buffer_size: usize,
    /// How long the read loop waits for a line before re-checking whether it
    /// should stop.
    pub read_interval_ms: u64,
    /// Sleep between write loop cycles.
    pub write_interval_ms: u64,
    /// Upper bound on alerts + chat messages handled per consumer tick.
    pub max_items_per_tick: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            read_buffer_size: 256,
            read_interval_ms: 150,
            write_interval_ms: 50,
            max_items_per_tick: 100,
        }
    }
}

impl ClientConfig {
    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.read_interval_ms)
    }

    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms)
    }

    /// `host:port` string, as used in log lines and errors.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Reject values the loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::InvalidConfig("address is empty".into()));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfig("port must be non-zero".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::InvalidConfig("read_buffer_size must be non-zero".into()));
        }
        if self.read_interval_ms == 0 || self.write_interval_ms == 0 {
            return Err(Error::InvalidConfig("tick intervals must be non-zero".into()));
        }
        if self.max_items_per_tick == 0 {
            return Err(Error::InvalidConfig("max_items_per_tick must be non-zero".into()));
        }
        Ok(())
    }
}

/// Login material for the `PASS`/`NICK` handshake.
///
/// A missing token is an anonymous login, not an error.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// OAuth token, with or without the `oauth:` prefix.
    pub token: Option<String>,
    /// Account login used as the nickname when a token is present.
    pub login: Option<String>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(login: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            login: Some(login.into()),
        }
    }

    /// True when no usable token is present.
    pub fn is_anonymous(&self) -> bool {
        self.token.as_deref().is_none_or(|t| t.trim().is_empty())
    }
}

// Keep tokens out of debug output.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("login", &self.login)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_twitch() {
        let config = ClientConfig::default();
        assert_eq!(config.server_addr(), "irc.chat.twitch.tv:6667");
        assert_eq!(config.read_buffer_size, 256);
        assert_eq!(config.read_interval(), Duration::from_millis(150));
        assert_eq!(config.write_interval(), Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_values() {
        let config = ClientConfig {
            read_buffer_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = ClientConfig {
            write_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_token_is_anonymous() {
        assert!(Credentials::anonymous().is_anonymous());
        assert!(Credentials::with_token("foo", " ").is_anonymous());
        assert!(!Credentials::with_token("foo", "abc").is_anonymous());
    }

    #[test]
    fn debug_masks_token() {
        let creds = Credentials::with_token("foo", "secret");
        let shown = format!("{creds:?}");
        assert!(!shown.contains("secret"));
        assert!(shown.contains("foo"));
    }
}
