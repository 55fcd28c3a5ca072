//! Error type for the consumer-facing API.
//!
//! Failures inside the read and write loops never surface here; they are
//! turned into [`ConnectionAlert`](crate::event::ConnectionAlert) values.

use std::io;

/// Errors returned by [`SessionController`](crate::session::SessionController)
/// and [`Connection`](crate::connection::Connection).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The TCP socket to the chat server could not be opened.
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// There is no live connection to send on.
    #[error("not connected")]
    NotConnected,

    /// A channel name was empty.
    #[error("channel name is empty")]
    EmptyChannel,

    /// A chat message body was empty.
    #[error("chat message is empty")]
    EmptyMessage,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The identity provider could not supply credentials.
    #[error("identity provider failed: {0}")]
    Identity(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
