//! Outbound side of a connection.
//!
//! Commands enter through a [`CommandSender`] on one of two lanes. The write
//! loop drains the priority lane completely every cycle, then sends from the
//! rate-limited lane only while the rolling window has room, then sleeps.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::command::Command;
use crate::connection::{InboundQueues, Shared};
use crate::rate_limit::RateLimit;

/// Which outbound queue a command goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Not rate limited: login, capabilities, JOIN/PART, PONG.
    Priority,
    /// Counted against the rolling window: chat messages and the like.
    RateLimited,
}

/// Cloneable handle for enqueuing outbound commands. Never blocks.
#[derive(Debug, Clone)]
pub struct CommandSender {
    priority: mpsc::UnboundedSender<Command>,
    limited: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    /// Enqueue a command. Returns false if the write loop is gone.
    pub fn send(&self, command: Command, lane: Lane) -> bool {
        let queue = match lane {
            Lane::Priority => &self.priority,
            Lane::RateLimited => &self.limited,
        };
        queue.send(command).is_ok()
    }

    /// Enqueue a preformatted line.
    pub fn send_command(&self, text: impl Into<String>, priority: bool) -> bool {
        let lane = if priority { Lane::Priority } else { Lane::RateLimited };
        self.send(Command::Raw(text.into()), lane)
    }
}

/// Receiving end of both lanes plus the timestamp ledger for the window.
#[derive(Debug)]
pub struct WriteScheduler {
    priority: mpsc::UnboundedReceiver<Command>,
    limited: mpsc::UnboundedReceiver<Command>,
    ledger: VecDeque<Instant>,
}

/// Create a connected sender/scheduler pair.
pub fn command_queues() -> (CommandSender, WriteScheduler) {
    let (priority_tx, priority_rx) = mpsc::unbounded_channel();
    let (limited_tx, limited_rx) = mpsc::unbounded_channel();
    (
        CommandSender {
            priority: priority_tx,
            limited: limited_tx,
        },
        WriteScheduler {
            priority: priority_rx,
            limited: limited_rx,
            ledger: VecDeque::new(),
        },
    )
}

impl WriteScheduler {
    /// One scheduling cycle. Returns the number of commands written.
    pub async fn run_cycle<W>(&mut self, writer: &mut W, limit: RateLimit) -> io::Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0;

        while let Ok(command) = self.priority.try_recv() {
            write_command(writer, &command).await?;
            written += 1;
        }

        let now = Instant::now();
        while let Some(&sent) = self.ledger.front() {
            if now.saturating_duration_since(sent) > limit.window {
                self.ledger.pop_front();
            } else {
                break;
            }
        }

        while self.ledger.len() < limit.count {
            let Ok(command) = self.limited.try_recv() else {
                break;
            };
            write_command(writer, &command).await?;
            self.ledger.push_back(Instant::now());
            written += 1;
        }

        Ok(written)
    }

    /// Sends recorded in the current window.
    pub fn in_window(&self) -> usize {
        self.ledger.len()
    }
}

async fn write_command<W>(writer: &mut W, command: &Command) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    tracing::debug!("< {}", command.redacted());
    writer.write_all(format!("{command}\r\n").as_bytes()).await?;
    writer.flush().await
}

/// Body of the write task. Hands the writer back when it stops.
pub(crate) async fn run_write_loop<W>(
    mut writer: W,
    mut scheduler: WriteScheduler,
    shared: Arc<Shared>,
    queues: InboundQueues,
    interval: Duration,
) -> W
where
    W: AsyncWrite + Unpin,
{
    tracing::debug!("Write loop started");

    while shared.is_running() {
        let limit = shared.rate_limit();
        if let Err(e) = scheduler.run_cycle(&mut writer, limit).await {
            tracing::warn!("Write to chat server failed: {e}");
            shared.interrupt(&queues);
            break;
        }
        tokio::time::sleep(interval).await;
    }

    tracing::debug!("Write loop stopped");
    writer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ConnectionAlert;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn lines(buf: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(buf)
            .split_terminator("\r\n")
            .map(str::to_string)
            .collect()
    }

    const TIGHT: RateLimit = RateLimit {
        count: 3,
        window: Duration::from_secs(30),
    };

    #[tokio::test(start_paused = true)]
    async fn priority_goes_first() {
        let (tx, mut scheduler) = command_queues();
        tx.send(Command::privmsg("bar", "one"), Lane::RateLimited);
        tx.send(Command::join("bar"), Lane::Priority);
        tx.send(Command::Pong("tmi.twitch.tv".into()), Lane::Priority);

        let mut out = Vec::new();
        let n = scheduler.run_cycle(&mut out, TIGHT).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(
            lines(&out),
            vec!["JOIN #bar", "PONG :tmi.twitch.tv", "PRIVMSG #bar :one"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn burst_never_exceeds_window() {
        let (tx, mut scheduler) = command_queues();
        for i in 0..10 {
            tx.send(Command::privmsg("bar", format!("m{i}")), Lane::RateLimited);
        }

        let mut out = Vec::new();
        assert_eq!(scheduler.run_cycle(&mut out, TIGHT).await.unwrap(), 3);
        assert_eq!(scheduler.in_window(), 3);

        // Same window: nothing more goes out, priority still does.
        tokio::time::advance(Duration::from_secs(10)).await;
        tx.send(Command::part("bar"), Lane::Priority);
        assert_eq!(scheduler.run_cycle(&mut out, TIGHT).await.unwrap(), 1);

        // Window boundary itself still counts.
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(scheduler.run_cycle(&mut out, TIGHT).await.unwrap(), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(scheduler.run_cycle(&mut out, TIGHT).await.unwrap(), 3);

        let sent = lines(&out);
        assert_eq!(
            sent,
            vec![
                "PRIVMSG #bar :m0",
                "PRIVMSG #bar :m1",
                "PRIVMSG #bar :m2",
                "PART #bar",
                "PRIVMSG #bar :m3",
                "PRIVMSG #bar :m4",
                "PRIVMSG #bar :m5",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_window_over_many_cycles() {
        let (tx, mut scheduler) = command_queues();
        for i in 0..50 {
            tx.send(Command::Raw(format!("CMD {i}")), Lane::RateLimited);
        }

        let mut out = Vec::new();
        let mut sends: Vec<Instant> = Vec::new();
        for _ in 0..600 {
            let n = scheduler.run_cycle(&mut out, TIGHT).await.unwrap();
            let now = Instant::now();
            sends.extend(std::iter::repeat_n(now, n));
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        assert_eq!(sends.len(), 50);
        for (i, start) in sends.iter().enumerate() {
            let in_window = sends[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) <= TIGHT.window)
                .count();
            assert!(in_window <= TIGHT.count, "window starting at send {i} had {in_window}");
        }
    }

    /// Writer whose peer has gone away.
    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn write_failure_interrupts_once_and_stops() {
        let (tx, scheduler) = command_queues();
        let (queues, mut rx) = InboundQueues::new();
        let shared = Arc::new(Shared::new());
        tx.send(Command::join("bar"), Lane::Priority);

        let run = run_write_loop(
            BrokenPipe,
            scheduler,
            Arc::clone(&shared),
            queues.clone(),
            Duration::from_millis(5),
        );
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("write loop kept running after a failed write");

        assert!(!shared.is_running());
        assert_eq!(rx.alerts.try_recv(), Ok(ConnectionAlert::ConnectionInterrupted));
        assert!(rx.alerts.try_recv().is_err());

        // The read side failing too does not alert a second time.
        shared.interrupt(&queues);
        assert!(rx.alerts.try_recv().is_err());
    }

    #[test]
    fn send_after_scheduler_dropped() {
        let (tx, scheduler) = command_queues();
        assert!(tx.send_command("PING :x", true));
        drop(scheduler);
        assert!(!tx.send_command("PING :x", false));
    }
}
