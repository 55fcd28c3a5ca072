//! Values the connection publishes for the consumer: connection alerts and
//! chat messages.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

use crate::irc::IrcTags;

/// Connection-state signal consumed by the session's reconnect logic.
///
/// These are transitions, not errors: the consumer observes them, it never
/// has to catch anything from the background loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionAlert {
    /// The socket could not be opened.
    NoConnection,
    /// The server rejected the OAuth token.
    BadLogin,
    /// The server rejected the login as malformed (missing token/nick).
    MissingLoginInfo,
    /// Registration completed (`001`).
    ConnectedToServer,
    /// The socket failed or closed, or the server asked us to reconnect.
    ConnectionInterrupted,
    /// The server confirmed our `JOIN`.
    JoinedChannel,
    /// The server confirmed our `PART`.
    LeftChannel,
}

impl ConnectionAlert {
    pub fn description(self) -> &'static str {
        match self {
            ConnectionAlert::NoConnection => "Failed to connect to the chat server",
            ConnectionAlert::BadLogin => "Login authentication failed",
            ConnectionAlert::MissingLoginInfo => "Login information is missing or malformed",
            ConnectionAlert::ConnectedToServer => "Connected to the chat server",
            ConnectionAlert::ConnectionInterrupted => "Connection interrupted",
            ConnectionAlert::JoinedChannel => "Joined channel",
            ConnectionAlert::LeftChannel => "Left channel",
        }
    }
}

impl fmt::Display for ConnectionAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A chat line received on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Channel name without the leading `#`.
    pub channel: String,
    /// Sender's login (lower-case nickname from the prefix).
    pub login: String,
    /// `display-name` tag, or the login when the tag is missing.
    pub display_name: String,
    /// Message body. For `/me` messages the CTCP wrapper is removed.
    pub message: String,
    /// True for `/me` (CTCP ACTION) messages.
    pub is_action: bool,
    pub tags: IrcTags,
}

impl ChatMessage {
    /// Server timestamp from the `tmi-sent-ts` tag.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        let millis: i64 = self.tags.get("tmi-sent-ts")?.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// `color` tag, if the user set one.
    pub fn color(&self) -> Option<&str> {
        self.tags.color()
    }

    pub fn has_badge(&self, name: &str) -> bool {
        self.tags.has_badge(name)
    }
}
