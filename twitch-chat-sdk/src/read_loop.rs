//! Inbound side of a connection: read lines, decode, publish.
//!
//! Nothing here calls consumer code. Results go into the alert and chat
//! queues; replies the protocol needs (PONG, JOIN after welcome) go into the
//! priority write lane.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};

use crate::codec::{self, Inbound};
use crate::command::Command;
use crate::connection::{InboundQueues, Shared};
use crate::event::ConnectionAlert;
use crate::write_loop::{CommandSender, Lane};

/// Longest inbound line kept, terminator included. Twitch lines with a full
/// tag block stay well under this.
pub(crate) const MAX_LINE_LEN: usize = 16 * 1024;

pub(crate) struct ReadContext {
    pub channel: String,
    pub shared: Arc<Shared>,
    pub queues: InboundQueues,
    pub commands: CommandSender,
    /// Longest wait for a line before re-checking the running flag.
    pub interval: Duration,
}

/// Body of the read task. Hands the reader back when it stops.
pub(crate) async fn run_read_loop<R>(mut reader: BufReader<R>, ctx: ReadContext) -> R
where
    R: AsyncRead + Unpin,
{
    tracing::debug!("Read loop started");
    let mut line = Vec::new();
    let mut oversized = false;

    while ctx.shared.is_running() {
        // A timed-out read leaves the bytes it got in `line`; the next call
        // continues the same line.
        let read = read_line_capped(&mut reader, &mut line, &mut oversized);
        match tokio::time::timeout(ctx.interval, read).await {
            Err(_) => continue,
            Ok(Ok(LineRead::Eof)) => {
                tracing::info!("Chat server closed the connection");
                ctx.shared.interrupt(&ctx.queues);
                break;
            }
            Ok(Err(e)) => {
                tracing::warn!("Read from chat server failed: {e}");
                ctx.shared.interrupt(&ctx.queues);
                break;
            }
            Ok(Ok(LineRead::TooLong)) => {
                tracing::warn!("Dropping inbound line longer than {MAX_LINE_LEN} bytes");
            }
            Ok(Ok(LineRead::Line)) => {
                let text = String::from_utf8_lossy(&line);
                let keep_reading = handle_line(text.trim_end_matches(['\r', '\n']), &ctx);
                line.clear();
                if !keep_reading {
                    break;
                }
            }
        }
    }

    tracing::debug!("Read loop stopped");
    reader.into_inner()
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// `line` holds a complete line (or the unterminated tail before EOF).
    Line,
    /// A line over [`MAX_LINE_LEN`] was skipped up to its newline.
    TooLong,
    Eof,
}

/// Like `read_until(b'\n')`, but never buffers more than [`MAX_LINE_LEN`]
/// bytes. An oversized line is discarded and reading resyncs at the next
/// newline. State lives in `line` and `oversized` so a cancelled call can be
/// resumed; bytes are only consumed after they have been copied.
async fn read_line_capped<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    oversized: &mut bool,
) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if !line.is_empty() && !*oversized {
                return Ok(LineRead::Line);
            }
            return Ok(LineRead::Eof);
        }

        let (used, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        if !*oversized {
            if line.len() + used > MAX_LINE_LEN {
                *oversized = true;
                line.clear();
            } else {
                line.extend_from_slice(&available[..used]);
            }
        }
        reader.consume(used);

        if complete {
            if std::mem::take(oversized) {
                return Ok(LineRead::TooLong);
            }
            return Ok(LineRead::Line);
        }
    }
}

/// Act on one line. Returns false when the loop should stop.
fn handle_line(line: &str, ctx: &ReadContext) -> bool {
    if line.trim().is_empty() {
        return true;
    }
    tracing::trace!("> {line}");

    let Some(inbound) = codec::decode(line) else {
        tracing::debug!(%line, "Dropping unparseable line");
        return true;
    };

    match inbound {
        Inbound::Ping(token) => {
            ctx.commands.send(Command::Pong(token), Lane::Priority);
        }
        Inbound::Welcome => {
            ctx.queues.alert(ConnectionAlert::ConnectedToServer);
            if !ctx.channel.is_empty() {
                ctx.commands.send(Command::join(&ctx.channel), Lane::Priority);
            }
        }
        Inbound::Joined(channel) => {
            tracing::info!(%channel, "Joined channel");
            ctx.queues.alert(ConnectionAlert::JoinedChannel);
        }
        Inbound::Parted(channel) => {
            tracing::info!(%channel, "Left channel");
            ctx.queues.alert(ConnectionAlert::LeftChannel);
        }
        Inbound::Chat(message) => {
            let _ = ctx.queues.chat.send(message);
        }
        Inbound::Alert(alert) => {
            tracing::warn!(%alert, "Server rejected login");
            ctx.queues.alert(alert);
        }
        Inbound::Notice(text) => {
            tracing::info!(notice = %text, "Server notice");
        }
        Inbound::UserState(tags) => {
            ctx.shared.set_user_tags(tags);
        }
        Inbound::Reconnect => {
            tracing::info!("Server requested reconnect");
            ctx.shared.interrupt(&ctx.queues);
            return false;
        }
        Inbound::Ignored(command) => {
            tracing::trace!(%command, "Ignoring");
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::InboundReceivers;
    use crate::rate_limit::RateLimit;
    use crate::write_loop::{WriteScheduler, command_queues};

    fn context() -> (ReadContext, InboundReceivers, WriteScheduler) {
        let (queues, receivers) = InboundQueues::new();
        let (commands, scheduler) = command_queues();
        let ctx = ReadContext {
            channel: "bar".into(),
            shared: Arc::new(Shared::new()),
            queues,
            commands,
            interval: Duration::from_millis(150),
        };
        (ctx, receivers, scheduler)
    }

    async fn written(scheduler: &mut WriteScheduler) -> Vec<String> {
        let mut out = Vec::new();
        scheduler.run_cycle(&mut out, RateLimit::REGULAR).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .split_terminator("\r\n")
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn tagged_privmsg_reaches_chat_queue() {
        let input: &[u8] = b"@badge-info=;badges=broadcaster/1;display-name=Foo;color=#FF0000 \
            :foo!foo@foo.tmi.twitch.tv PRIVMSG #bar :hello world\r\n";
        let (ctx, mut rx, _scheduler) = context();

        run_read_loop(BufReader::with_capacity(256, input), ctx).await;

        let chat = rx.chat.try_recv().unwrap();
        assert_eq!(chat.login, "foo");
        assert_eq!(chat.display_name, "Foo");
        assert_eq!(chat.message, "hello world");
        assert!(chat.tags.has_badge("broadcaster"));
        assert!(rx.chat.try_recv().is_err());

        // EOF afterwards is an interruption, reported once.
        assert_eq!(rx.alerts.try_recv(), Ok(ConnectionAlert::ConnectionInterrupted));
        assert!(rx.alerts.try_recv().is_err());
    }

    #[tokio::test]
    async fn long_lines_exceed_buffer() {
        let body = "x".repeat(1000);
        let input = format!(":foo!foo@foo.tmi.twitch.tv PRIVMSG #bar :{body}\r\n");
        let (ctx, mut rx, _scheduler) = context();

        run_read_loop(BufReader::with_capacity(64, input.as_bytes()), ctx).await;

        assert_eq!(rx.chat.try_recv().unwrap().message, body);
    }

    #[tokio::test]
    async fn oversized_line_is_dropped_and_reading_resyncs() {
        let flood = "x".repeat(MAX_LINE_LEN * 2);
        let input = format!(
            ":foo!foo@foo.tmi.twitch.tv PRIVMSG #bar :{flood}\r\n\
             :foo!foo@foo.tmi.twitch.tv PRIVMSG #bar :after\r\n"
        );
        let (ctx, mut rx, _scheduler) = context();

        run_read_loop(BufReader::with_capacity(256, input.as_bytes()), ctx).await;

        assert_eq!(rx.chat.try_recv().unwrap().message, "after");
        assert!(rx.chat.try_recv().is_err());
    }

    #[tokio::test]
    async fn capped_read_never_buffers_past_limit() {
        let input = vec![b'x'; MAX_LINE_LEN * 3];
        let mut reader = BufReader::with_capacity(256, input.as_slice());
        let mut line = Vec::new();
        let mut oversized = false;

        let read = read_line_capped(&mut reader, &mut line, &mut oversized).await.unwrap();
        assert_eq!(read, LineRead::Eof);
        assert!(line.is_empty());
    }

    #[tokio::test]
    async fn unterminated_tail_before_eof_is_a_line() {
        let mut reader = BufReader::new(&b"PING :tmi.twitch.tv"[..]);
        let mut line = Vec::new();
        let mut oversized = false;

        let read = read_line_capped(&mut reader, &mut line, &mut oversized).await.unwrap();
        assert_eq!(read, LineRead::Line);
        assert_eq!(line, b"PING :tmi.twitch.tv");
        line.clear();
        let read = read_line_capped(&mut reader, &mut line, &mut oversized).await.unwrap();
        assert_eq!(read, LineRead::Eof);
    }

    #[tokio::test]
    async fn welcome_ping_and_join() {
        let input: &[u8] = b":tmi.twitch.tv CAP * ACK :twitch.tv/tags twitch.tv/commands\r\n\
            :tmi.twitch.tv 001 justinfan1234 :Welcome, GLHF!\r\n\
            PING :tmi.twitch.tv\r\n\
            :justinfan1234!justinfan1234@justinfan1234.tmi.twitch.tv JOIN #bar\r\n\
            not a valid line ???\r\n\
            \r\n";
        let (ctx, mut rx, mut scheduler) = context();

        run_read_loop(BufReader::new(input), ctx).await;

        assert_eq!(rx.alerts.try_recv(), Ok(ConnectionAlert::ConnectedToServer));
        assert_eq!(rx.alerts.try_recv(), Ok(ConnectionAlert::JoinedChannel));
        assert_eq!(rx.alerts.try_recv(), Ok(ConnectionAlert::ConnectionInterrupted));
        assert_eq!(
            written(&mut scheduler).await,
            vec!["JOIN #bar", "PONG :tmi.twitch.tv"]
        );
    }

    #[tokio::test]
    async fn bad_login_is_published() {
        let input: &[u8] = b":tmi.twitch.tv NOTICE * :Login authentication failed\r\n";
        let (ctx, mut rx, _scheduler) = context();

        run_read_loop(BufReader::new(input), ctx).await;

        assert_eq!(rx.alerts.try_recv(), Ok(ConnectionAlert::BadLogin));
        assert_eq!(rx.alerts.try_recv(), Ok(ConnectionAlert::ConnectionInterrupted));
    }

    #[tokio::test]
    async fn user_state_updates_rate_limit() {
        let input: &[u8] = b"@badges=moderator/1;display-name=Me :tmi.twitch.tv USERSTATE #bar\r\n";
        let (ctx, _rx, _scheduler) = context();
        let shared = Arc::clone(&ctx.shared);

        run_read_loop(BufReader::new(input), ctx).await;

        assert_eq!(shared.rate_limit(), RateLimit::PRIVILEGED);
        assert!(shared.user_tags().unwrap().has_badge("moderator"));
    }

    #[tokio::test]
    async fn reconnect_request_interrupts() {
        let input: &[u8] = b":tmi.twitch.tv RECONNECT\r\n\
            :foo!foo@foo.tmi.twitch.tv PRIVMSG #bar :never read\r\n";
        let (ctx, mut rx, _scheduler) = context();

        run_read_loop(BufReader::new(input), ctx).await;

        assert_eq!(rx.alerts.try_recv(), Ok(ConnectionAlert::ConnectionInterrupted));
        assert!(rx.alerts.try_recv().is_err());
        assert!(rx.chat.try_recv().is_err());
    }

    #[tokio::test]
    async fn stopped_loop_exits_without_alert() {
        let (client, _server) = tokio::io::duplex(64);
        let (ctx, mut rx, _scheduler) = context();
        let shared = Arc::clone(&ctx.shared);
        let task = tokio::spawn(run_read_loop(BufReader::new(client), ctx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shared.stop();
        task.await.unwrap();

        assert!(rx.alerts.try_recv().is_err());
    }
}
