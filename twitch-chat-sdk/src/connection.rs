//! One network session with the chat server.
//!
//! A `Connection` owns the socket and the two background tasks that use it.
//! The socket is opened by [`Connection::open`]; nothing runs until
//! [`Connection::begin`]. Teardown is [`Connection::end`] (cooperative, waits
//! for both loops, then shuts the socket down) or
//! [`Connection::blocking_end`] (forced, for callers that cannot await).
//! Either is idempotent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::command::{self, Command};
use crate::config::{ClientConfig, Credentials};
use crate::error::{Error, Result};
use crate::event::{ChatMessage, ConnectionAlert};
use crate::irc::IrcTags;
use crate::rate_limit::{RateLimit, RateLimitRole};
use crate::read_loop::{self, ReadContext};
use crate::write_loop::{self, CommandSender, Lane, WriteScheduler};

/// Producer ends of the queues the background loops publish into.
#[derive(Debug, Clone)]
pub struct InboundQueues {
    pub alerts: mpsc::UnboundedSender<ConnectionAlert>,
    pub chat: mpsc::UnboundedSender<ChatMessage>,
}

/// Consumer ends matching an [`InboundQueues`].
#[derive(Debug)]
pub struct InboundReceivers {
    pub alerts: mpsc::UnboundedReceiver<ConnectionAlert>,
    pub chat: mpsc::UnboundedReceiver<ChatMessage>,
}

impl InboundQueues {
    pub fn new() -> (InboundQueues, InboundReceivers) {
        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        let (chat_tx, chat_rx) = mpsc::unbounded_channel();
        (
            InboundQueues {
                alerts: alert_tx,
                chat: chat_tx,
            },
            InboundReceivers {
                alerts: alert_rx,
                chat: chat_rx,
            },
        )
    }

    pub(crate) fn alert(&self, alert: ConnectionAlert) {
        // A closed receiver means the session is gone; nothing to tell.
        let _ = self.alerts.send(alert);
    }
}

/// State both loops and the owning connection look at.
#[derive(Debug)]
pub(crate) struct Shared {
    running: AtomicBool,
    role: Mutex<RateLimitRole>,
    user_tags: Mutex<Option<IrcTags>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            role: Mutex::new(RateLimitRole::Regular),
            user_tags: Mutex::new(None),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the running flag. True if this call did it.
    pub(crate) fn stop(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    /// Stop both loops because the socket failed. Publishes
    /// `ConnectionInterrupted` only if the connection was still running, so
    /// a requested teardown stays silent and two failing loops alert once.
    pub(crate) fn interrupt(&self, queues: &InboundQueues) {
        if self.stop() {
            queues.alert(ConnectionAlert::ConnectionInterrupted);
        }
    }

    pub(crate) fn rate_limit(&self) -> RateLimit {
        self.role.lock().limit()
    }

    pub(crate) fn role(&self) -> RateLimitRole {
        *self.role.lock()
    }

    pub(crate) fn set_user_tags(&self, tags: IrcTags) {
        let role = RateLimitRole::from_tags(&tags);
        {
            let mut current = self.role.lock();
            if *current != role {
                tracing::info!(?role, "Rate limit role changed");
            }
            *current = role;
        }
        *self.user_tags.lock() = Some(tags);
    }

    pub(crate) fn user_tags(&self) -> Option<IrcTags> {
        self.user_tags.lock().clone()
    }
}

/// A single connection to the chat server for one channel.
pub struct Connection {
    channel: String,
    config: ClientConfig,
    stream: Option<TcpStream>,
    shared: Arc<Shared>,
    queues: InboundQueues,
    commands: CommandSender,
    scheduler: Option<WriteScheduler>,
    read_task: Option<JoinHandle<OwnedReadHalf>>,
    write_task: Option<JoinHandle<OwnedWriteHalf>>,
    disconnect_called: bool,
}

impl Connection {
    /// Open the socket. No loops are started yet.
    pub async fn open(config: &ClientConfig, channel: &str, queues: InboundQueues) -> Result<Self> {
        let addr = config.server_addr();
        tracing::debug!("Connecting to {addr}...");
        let stream = TcpStream::connect((config.address.as_str(), config.port))
            .await
            .map_err(|source| Error::Connect {
                addr: addr.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("TCP_NODELAY not set: {e}");
        }
        tracing::info!("TCP connected to {addr}");

        let (commands, scheduler) = write_loop::command_queues();
        Ok(Self {
            channel: command::normalize_channel(channel),
            config: config.clone(),
            stream: Some(stream),
            shared: Arc::new(Shared::new()),
            queues,
            commands,
            scheduler: Some(scheduler),
            read_task: None,
            write_task: None,
            disconnect_called: false,
        })
    }

    /// Start the read and write tasks and queue the login handshake.
    ///
    /// Calling it again, or after teardown, does nothing.
    pub fn begin(&mut self, credentials: &Credentials) {
        let (Some(stream), Some(scheduler)) = (self.stream.take(), self.scheduler.take()) else {
            tracing::warn!("Connection already started or torn down; ignoring begin");
            return;
        };
        let (read_half, write_half) = stream.into_split();

        let ctx = ReadContext {
            channel: self.channel.clone(),
            shared: Arc::clone(&self.shared),
            queues: self.queues.clone(),
            commands: self.commands.clone(),
            interval: self.config.read_interval(),
        };
        let reader = BufReader::with_capacity(self.config.read_buffer_size, read_half);
        self.read_task = Some(tokio::spawn(read_loop::run_read_loop(reader, ctx)));

        self.write_task = Some(tokio::spawn(write_loop::run_write_loop(
            write_half,
            scheduler,
            Arc::clone(&self.shared),
            self.queues.clone(),
            self.config.write_interval(),
        )));

        for command in login_commands(credentials) {
            self.commands.send(command, Lane::Priority);
        }
    }

    /// Cooperative teardown: stop both loops, wait until they have exited,
    /// then shut the socket down.
    pub async fn end(&mut self) {
        if self.disconnect_called {
            return;
        }
        self.disconnect_called = true;
        self.shared.stop();

        let read_half = match self.read_task.take() {
            Some(task) => task.await.map_err(|e| tracing::warn!("Read task failed: {e}")).ok(),
            None => None,
        };
        let write_half = match self.write_task.take() {
            Some(task) => task.await.map_err(|e| tracing::warn!("Write task failed: {e}")).ok(),
            None => None,
        };

        if let (Some(read_half), Some(write_half)) = (read_half, write_half) {
            match read_half.reunite(write_half) {
                Ok(mut stream) => {
                    if let Err(e) = stream.shutdown().await {
                        tracing::debug!("Socket shutdown: {e}");
                    }
                }
                Err(e) => tracing::warn!("Could not reunite socket halves: {e}"),
            }
        }
        // Opened but never started.
        self.stream = None;
        tracing::debug!(channel = %self.channel, "Connection closed");
    }

    /// Forced teardown for callers that cannot await (e.g. `Drop`). Aborts
    /// both tasks; the socket halves they own are dropped, closing it.
    ///
    /// On a multi-thread runtime this also waits for both aborted tasks to
    /// finish, so neither loop publishes anything after it returns. On a
    /// current-thread runtime the loops cannot be mid-iteration while this
    /// runs, and abort alone stops them. Outside a runtime the tasks are
    /// only aborted.
    pub fn blocking_end(&mut self) {
        if self.disconnect_called {
            return;
        }
        self.disconnect_called = true;
        self.shared.stop();

        let read_task = self.read_task.take();
        let write_task = self.write_task.take();
        if let Some(task) = &read_task {
            task.abort();
        }
        if let Some(task) = &write_task {
            task.abort();
        }

        let started = read_task.is_some() || write_task.is_some();
        let multi_thread = Handle::try_current()
            .ok()
            .filter(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread);
        if let (true, Some(handle)) = (started, multi_thread) {
            tokio::task::block_in_place(|| {
                handle.block_on(async {
                    if let Some(task) = read_task {
                        let _ = task.await;
                    }
                    if let Some(task) = write_task {
                        let _ = task.await;
                    }
                })
            });
        }
        self.stream = None;
        tracing::debug!(channel = %self.channel, "Connection closed (forced)");
    }

    /// Enqueue a raw command line on the priority or rate-limited lane.
    pub fn send_command(&self, text: impl Into<String>, priority: bool) -> bool {
        self.commands.send_command(text, priority)
    }

    pub fn send(&self, command: Command, lane: Lane) -> bool {
        self.commands.send(command, lane)
    }

    /// Queue `PRIVMSG #<channel> :<text>` on the rate-limited lane.
    pub fn send_chat_message(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            tracing::warn!("Tried sending an empty chat message");
            return Err(Error::EmptyMessage);
        }
        self.commands
            .send(Command::privmsg(&self.channel, text), Lane::RateLimited);
        Ok(())
    }

    /// Handle for enqueuing from elsewhere.
    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// True while the loops are running (false before `begin` returns the
    /// loops, never true again after teardown or a socket failure).
    pub fn is_running(&self) -> bool {
        self.read_task.is_some() && self.shared.is_running()
    }

    pub fn disconnect_called(&self) -> bool {
        self.disconnect_called
    }

    pub fn rate_limit(&self) -> RateLimit {
        self.shared.rate_limit()
    }

    pub fn rate_limit_role(&self) -> RateLimitRole {
        self.shared.role()
    }

    /// Tags from the latest `GLOBALUSERSTATE`/`USERSTATE` for our own user.
    pub fn client_user_tags(&self) -> Option<IrcTags> {
        self.shared.user_tags()
    }

    /// Replace the client user tags and recompute the rate-limit role.
    pub fn set_client_user_tags(&self, tags: IrcTags) {
        self.shared.set_user_tags(tags);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.blocking_end();
    }
}

/// `PASS`, `NICK` and `CAP REQ` for a login.
fn login_commands(credentials: &Credentials) -> [Command; 3] {
    let (pass, nick) = match (&credentials.token, &credentials.login) {
        (Some(token), Some(login)) if !credentials.is_anonymous() && !login.trim().is_empty() => {
            (Some(token.clone()), login.trim().to_lowercase())
        }
        (Some(_), _) if !credentials.is_anonymous() => {
            tracing::warn!("OAuth token given without a login; connecting anonymously");
            (None, command::anonymous_nick())
        }
        _ => (None, command::anonymous_nick()),
    };
    tracing::debug!(%nick, anonymous = pass.is_none(), "Logging in");
    [Command::Pass(pass), Command::Nick(nick), Command::CapReq]
}
