//! Connection engine for Twitch IRC chat.
//!
//! A [`SessionController`](session::SessionController) owns at most one live
//! [`Connection`](connection::Connection). Each connection runs two background
//! tasks against the socket: a read loop that decodes server lines and
//! publishes alerts and chat messages into queues, and a write loop that
//! drains a priority lane immediately and a rate-limited lane under Twitch's
//! command limits. The controller drains those queues on the consumer's own
//! tick, drives reconnects with backoff, and fans results out to subscribers.
//!
//! ```no_run
//! use twitch_chat_sdk::{ClientConfig, Credentials, SessionController};
//!
//! # async fn demo() -> twitch_chat_sdk::Result<()> {
//! let mut session = SessionController::new(ClientConfig::default(), Credentials::anonymous())?;
//! let mut chat = session.subscribe_chat();
//! session.connect("somechannel").await;
//! loop {
//!     session.tick().await;
//!     while let Ok(msg) = chat.try_recv() {
//!         println!("{}: {}", msg.display_name, msg.message);
//!     }
//!     tokio::time::sleep(std::time::Duration::from_millis(16)).await;
//! }
//! # }
//! ```

pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod identity;
pub mod irc;
pub mod rate_limit;
mod read_loop;
pub mod session;
pub mod write_loop;

pub use command::Command;
pub use config::{ClientConfig, Credentials};
pub use error::{Error, Result};
pub use event::{ChatMessage, ConnectionAlert};
pub use identity::{Identity, IdentityProvider, StaticIdentity};
pub use irc::IrcTags;
pub use rate_limit::{RateLimit, RateLimitRole};
pub use session::{SessionController, SessionState, Subscription, SubscriptionId};
