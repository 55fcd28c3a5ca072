//! Consumer-facing session: owns at most one [`Connection`], drains its
//! queues on the consumer's tick, reconnects with backoff, and republishes
//! chat messages and alerts to subscribers.
//!
//! ## Reconnect policy
//!
//! | Alert | Action |
//! |---|---|
//! | `NoConnection`, `BadLogin`, `MissingLoginInfo` | reset fail count, disconnect |
//! | `ConnectionInterrupted` | reconnect after [`reconnect_delay`] |
//! | `JoinedChannel` | reset fail count |
//! | others | none |
//!
//! A delay is never slept inside [`SessionController::tick`]; the retry is
//! scheduled and the first tick after the deadline opens the new socket.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;

use crate::command::{self, Command};
use crate::config::{ClientConfig, Credentials};
use crate::connection::{Connection, InboundQueues, InboundReceivers};
use crate::error::{Error, Result};
use crate::event::{ChatMessage, ConnectionAlert};
use crate::identity::IdentityProvider;
use crate::irc::IrcTags;
use crate::rate_limit::RateLimit;
use crate::write_loop::Lane;

/// Delay before the reconnect that follows `fail_count` earlier consecutive
/// failures: 0, 0, 1, 2, 4, 8, ... seconds.
pub fn reconnect_delay(fail_count: u32) -> Duration {
    if fail_count < 2 {
        return Duration::ZERO;
    }
    let secs = 1u64.checked_shl(fail_count - 2).unwrap_or(u64::MAX);
    Duration::from_secs(secs)
}

/// Where the session is in its connect/reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection and no retry pending.
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Loops running (login/join may still be in flight).
    Connected,
    /// Connection lost; a reconnect is scheduled.
    Interrupted,
}

/// Identifies a subscription for [`SessionController::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of a chat or alert subscription.
///
/// Dropping it unsubscribes on the next dispatch.
#[derive(Debug)]
pub struct Subscription<T> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }
}

struct Subscribers<T> {
    senders: Vec<(SubscriptionId, mpsc::UnboundedSender<T>)>,
}

impl<T: Clone> Subscribers<T> {
    fn new() -> Self {
        Self {
            senders: Vec::new(),
        }
    }

    fn add(&mut self, id: SubscriptionId) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push((id, tx));
        Subscription { id, rx }
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.senders.len();
        self.senders.retain(|(sid, _)| *sid != id);
        self.senders.len() != before
    }

    /// Send to every live subscriber, forgetting the ones that went away.
    fn publish(&mut self, item: &T) {
        self.senders.retain(|(_, tx)| tx.send(item.clone()).is_ok());
    }

    fn len(&self) -> usize {
        self.senders.len()
    }
}

/// Owns the chat connection on behalf of one consumer.
pub struct SessionController {
    config: ClientConfig,
    credentials: Credentials,
    channel: String,
    state: SessionState,
    fail_count: u32,
    retry_at: Option<Instant>,
    last_reconnect_delay: Option<Duration>,
    connection: Option<Connection>,
    queues: InboundQueues,
    inbound: InboundReceivers,
    next_subscription: u64,
    chat_subscribers: Subscribers<ChatMessage>,
    alert_subscribers: Subscribers<ConnectionAlert>,
}

impl SessionController {
    pub fn new(config: ClientConfig, credentials: Credentials) -> Result<Self> {
        config.validate()?;
        let (queues, inbound) = InboundQueues::new();
        Ok(Self {
            config,
            credentials,
            channel: String::new(),
            state: SessionState::Disconnected,
            fail_count: 0,
            retry_at: None,
            last_reconnect_delay: None,
            connection: None,
            queues,
            inbound,
            next_subscription: 0,
            chat_subscribers: Subscribers::new(),
            alert_subscribers: Subscribers::new(),
        })
    }

    // ── Subscriptions ──

    pub fn subscribe_chat(&mut self) -> Subscription<ChatMessage> {
        let id = self.next_subscription_id();
        self.chat_subscribers.add(id)
    }

    pub fn subscribe_alerts(&mut self) -> Subscription<ConnectionAlert> {
        let id = self.next_subscription_id();
        self.alert_subscribers.add(id)
    }

    /// Remove a chat or alert subscription. False if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.chat_subscribers.remove(id) || self.alert_subscribers.remove(id)
    }

    fn next_subscription_id(&mut self) -> SubscriptionId {
        self.next_subscription += 1;
        SubscriptionId(self.next_subscription)
    }

    // ── Connection lifecycle ──

    /// Replace the credentials used by the next connect.
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
    }

    /// Fetch credentials and channel from `provider`, then connect.
    pub async fn connect_as<P: IdentityProvider>(&mut self, provider: &P) -> Result<()> {
        let identity = provider.identity().await?;
        self.credentials = identity.credentials();
        self.connect(&identity.channel).await;
        Ok(())
    }

    /// Tear down any current connection and connect to `channel` now.
    ///
    /// If the socket cannot be opened a `NoConnection` alert is queued.
    pub async fn connect(&mut self, channel: &str) {
        self.channel = command::normalize_channel(channel);
        if self.channel.is_empty() {
            tracing::warn!("Connecting without a channel; nothing will be joined");
        }
        self.restart(Duration::ZERO).await;
    }

    /// Cooperative disconnect. A no-op when there is nothing to tear down.
    pub async fn disconnect(&mut self) {
        self.retry_at = None;
        self.state = SessionState::Disconnected;
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        connection.end().await;
        self.reset_queues();
        tracing::info!("Disconnected from Twitch chat");
    }

    /// Forced disconnect for contexts that cannot await.
    pub fn blocking_disconnect(&mut self) {
        self.retry_at = None;
        self.state = SessionState::Disconnected;
        if let Some(mut connection) = self.connection.take() {
            connection.blocking_end();
            self.reset_queues();
            tracing::info!("Disconnected from Twitch chat");
        }
    }

    /// Swap in fresh queues. Whatever a torn-down connection left behind, or
    /// still pushes, is never read.
    fn reset_queues(&mut self) {
        let (queues, inbound) = InboundQueues::new();
        self.queues = queues;
        self.inbound = inbound;
    }

    async fn restart(&mut self, delay: Duration) {
        self.retry_at = None;
        if let Some(mut old) = self.connection.take() {
            old.end().await;
        }
        self.reset_queues();
        if delay.is_zero() {
            self.establish().await;
        } else {
            tracing::info!("Reconnecting in {} seconds", delay.as_secs());
            self.retry_at = Some(Instant::now() + delay);
        }
    }

    async fn establish(&mut self) {
        self.state = SessionState::Connecting;
        match Connection::open(&self.config, &self.channel, self.queues.clone()).await {
            Ok(mut connection) => {
                connection.begin(&self.credentials);
                self.connection = Some(connection);
                self.state = SessionState::Connected;
            }
            Err(e) => {
                tracing::warn!("{e}");
                self.state = SessionState::Disconnected;
                self.queues.alert(ConnectionAlert::NoConnection);
            }
        }
    }

    // ── Consumer tick ──

    /// Run one consumer tick: start a due reconnect, then handle queued
    /// alerts and dispatch queued chat messages, at most
    /// `max_items_per_tick` in total. Returns how many items were handled.
    pub async fn tick(&mut self) -> usize {
        if self.retry_at.is_some_and(|at| Instant::now() >= at) {
            self.retry_at = None;
            self.establish().await;
        }

        let budget = self.config.max_items_per_tick;
        let mut handled = 0;

        while handled < budget {
            let Ok(alert) = self.inbound.alerts.try_recv() else {
                break;
            };
            self.handle_alert(alert).await;
            handled += 1;
        }

        while handled < budget {
            let Ok(message) = self.inbound.chat.try_recv() else {
                break;
            };
            self.chat_subscribers.publish(&message);
            handled += 1;
        }

        handled
    }

    async fn handle_alert(&mut self, alert: ConnectionAlert) {
        tracing::debug!(%alert, "Connection alert");

        match alert {
            ConnectionAlert::NoConnection
            | ConnectionAlert::BadLogin
            | ConnectionAlert::MissingLoginInfo => {
                self.fail_count = 0;
                self.disconnect().await;
            }
            ConnectionAlert::ConnectionInterrupted => {
                if self.state == SessionState::Disconnected {
                    tracing::debug!("Interruption after disconnect; not reconnecting");
                } else {
                    let delay = reconnect_delay(self.fail_count);
                    self.fail_count += 1;
                    self.last_reconnect_delay = Some(delay);
                    self.state = SessionState::Interrupted;
                    self.restart(delay).await;
                }
            }
            ConnectionAlert::JoinedChannel => {
                self.fail_count = 0;
            }
            ConnectionAlert::ConnectedToServer | ConnectionAlert::LeftChannel => {}
        }

        self.alert_subscribers.publish(&alert);
    }

    // ── Outbound ──

    fn live_connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or(Error::NotConnected)
    }

    /// Queue `JOIN #<channel>` on the priority lane.
    pub fn join_channel(&self, channel: &str) -> Result<()> {
        let channel = command::normalize_channel(channel);
        if channel.is_empty() {
            tracing::error!("Failed joining channel. Channel name is empty");
            return Err(Error::EmptyChannel);
        }
        self.live_connection()?
            .send(Command::Join(channel), Lane::Priority);
        Ok(())
    }

    /// Queue `PART #<channel>` on the priority lane.
    pub fn leave_channel(&self, channel: &str) -> Result<()> {
        let channel = command::normalize_channel(channel);
        if channel.is_empty() {
            tracing::error!("Failed leaving channel. Channel name is empty");
            return Err(Error::EmptyChannel);
        }
        self.live_connection()?
            .send(Command::Part(channel), Lane::Priority);
        Ok(())
    }

    /// Queue a chat message to the current channel (rate limited).
    pub fn send_chat_message(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            tracing::warn!("Tried sending an empty chat message");
            return Err(Error::EmptyMessage);
        }
        self.live_connection()?.send_chat_message(text)
    }

    /// Queue a raw command line.
    pub fn send_command(&self, text: &str, priority: bool) -> Result<()> {
        self.live_connection()?.send_command(text, priority);
        Ok(())
    }

    // ── Accessors ──

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Backoff applied before the latest automatic reconnect.
    pub fn last_reconnect_delay(&self) -> Option<Duration> {
        self.last_reconnect_delay
    }

    /// When a scheduled reconnect will be attempted.
    pub fn reconnect_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn client_user_tags(&self) -> Option<IrcTags> {
        self.connection.as_ref()?.client_user_tags()
    }

    /// Current limit, or the regular one when not connected.
    pub fn rate_limit(&self) -> RateLimit {
        self.connection
            .as_ref()
            .map_or(RateLimit::REGULAR, Connection::rate_limit)
    }

    pub fn subscriber_count(&self) -> usize {
        self.chat_subscribers.len() + self.alert_subscribers.len()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.blocking_disconnect();
    }
}
