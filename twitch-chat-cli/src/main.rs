//! twitch-chat: read and write Twitch chat from a terminal.
//!
//! Chat lines are printed as they arrive. Lines typed on stdin are sent to the
//! joined channel. Commands:
//!
//!   /join <channel>   Join another channel
//!   /part <channel>   Leave a channel
//!   /raw <line>       Send a raw IRC line (rate limited)
//!   /quit             Disconnect and exit
//!
//! Without a login and token the session is anonymous and read-only.

mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use twitch_chat_sdk::{ChatMessage, Identity, SessionController, StaticIdentity};

use config::{Config, Resolved};

/// How often the session is ticked.
const TICK: Duration = Duration::from_millis(16);

#[derive(Parser, Debug)]
#[command(name = "twitch-chat", about = "Twitch chat in the terminal")]
pub struct Args {
    /// Config file (default: ~/.config/twitch-chat/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Chat server host
    #[arg(long)]
    server: Option<String>,

    /// Chat server port
    #[arg(long)]
    port: Option<u16>,

    /// Channel to join
    #[arg(long)]
    channel: Option<String>,

    /// Account login (needed with --token)
    #[arg(long)]
    login: Option<String>,

    /// OAuth token (or set TWITCH_OAUTH_TOKEN env var)
    #[arg(long, env = "TWITCH_OAUTH_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let json_logs = std::env::var("TWITCH_CHAT_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "twitch_chat_cli=info,twitch_chat_sdk=info".into());
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(config::default_path);
    let resolved = Resolved::merge(&args, Config::load(&config_path));
    if resolved.channel.is_empty() {
        anyhow::bail!(
            "No channel given; pass --channel or set `channel` in {}",
            config_path.display()
        );
    }

    let identity = StaticIdentity(Identity {
        token: resolved.credentials.token.clone(),
        login: resolved.credentials.login.clone(),
        channel: resolved.channel.clone(),
    });
    if resolved.credentials.is_anonymous() {
        tracing::info!("No token configured; joining read-only as an anonymous user");
    }

    let mut session = SessionController::new(resolved.client, resolved.credentials)
        .context("invalid client configuration")?;
    let mut chat = session.subscribe_chat();
    let mut alerts = session.subscribe_alerts();
    session.connect_as(&identity).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                session.tick().await;
                while let Ok(alert) = alerts.try_recv() {
                    println!("*** {}", alert.description());
                }
                while let Ok(message) = chat.try_recv() {
                    println!("{}", format_chat(&message));
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_input(&session, line.trim()) {
                            break;
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        tracing::warn!("stdin: {e}");
                        stdin_open = false;
                    }
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    session.disconnect().await;
    Ok(())
}

/// Act on one stdin line. Returns false to quit.
fn handle_input(session: &SessionController, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    let (command, rest) = match line.strip_prefix('/') {
        Some(cmd) => cmd.split_once(' ').unwrap_or((cmd, "")),
        None => ("", line),
    };
    let result = match command {
        "" => session.send_chat_message(rest),
        "join" => session.join_channel(rest),
        "part" => session.leave_channel(rest),
        "raw" => session.send_command(rest, false),
        "quit" => return false,
        other => {
            eprintln!("Unknown command /{other}");
            return true;
        }
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
    }
    true
}

fn format_chat(message: &ChatMessage) -> String {
    let time = message
        .sent_at()
        .map(|t| t.with_timezone(&chrono::Local))
        .unwrap_or_else(chrono::Local::now)
        .format("%H:%M:%S");
    if message.is_action {
        format!("[{time}] #{} * {} {}", message.channel, message.display_name, message.message)
    } else {
        format!("[{time}] #{} <{}> {}", message.channel, message.display_name, message.message)
    }
}
