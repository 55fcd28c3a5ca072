//! Maps parsed server lines onto what the read loop has to do with them.
//!
//! Decoding never fails hard: lines that carry no recognizable command come
//! back as `None`, commands with no meaning for a chat client come back as
//! [`Inbound::Ignored`]. Both are logged by the caller and dropped.

use crate::event::{ChatMessage, ConnectionAlert};
use crate::irc::{IrcTags, Message};

/// NOTICE text Twitch sends when the token is rejected.
const LOGIN_FAILED: &str = "Login authentication failed";
/// NOTICE text Twitch sends when PASS/NICK are malformed.
const IMPROPER_AUTH: &str = "Improperly formatted auth";

/// Result of decoding one server line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Server keepalive; answer with `PONG :<token>`.
    Ping(String),
    /// `001`: login accepted.
    Welcome,
    /// Confirmation of our JOIN.
    Joined(String),
    /// Confirmation of our PART.
    Parted(String),
    Chat(ChatMessage),
    /// Login failure or another state change carried by a NOTICE.
    Alert(ConnectionAlert),
    /// NOTICE without connection-state meaning.
    Notice(String),
    /// `GLOBALUSERSTATE` / `USERSTATE`: our own user's tags.
    UserState(IrcTags),
    /// Server asks clients to reconnect (maintenance).
    Reconnect,
    /// Recognized but irrelevant, with the command for logging.
    Ignored(String),
}

/// Decode one raw line.
pub fn decode(line: &str) -> Option<Inbound> {
    let msg = Message::parse(line)?;
    Some(dispatch(msg))
}

fn dispatch(msg: Message) -> Inbound {
    match msg.command.as_str() {
        "PING" => Inbound::Ping(msg.trailing().unwrap_or("tmi.twitch.tv").to_string()),
        "001" => Inbound::Welcome,
        "JOIN" => Inbound::Joined(channel_param(&msg)),
        "PART" => Inbound::Parted(channel_param(&msg)),
        "PRIVMSG" => match chat_message(msg) {
            Ok(chat) => Inbound::Chat(chat),
            Err(command) => Inbound::Ignored(command),
        },
        "NOTICE" => notice(&msg),
        "GLOBALUSERSTATE" | "USERSTATE" => Inbound::UserState(msg.tags),
        "RECONNECT" => Inbound::Reconnect,
        _ => Inbound::Ignored(msg.command),
    }
}

fn channel_param(msg: &Message) -> String {
    msg.params
        .first()
        .map(|c| c.trim_start_matches('#').to_string())
        .unwrap_or_default()
}

fn notice(msg: &Message) -> Inbound {
    let text = msg.trailing().unwrap_or("");
    if text.starts_with(LOGIN_FAILED) {
        Inbound::Alert(ConnectionAlert::BadLogin)
    } else if text.starts_with(IMPROPER_AUTH) {
        Inbound::Alert(ConnectionAlert::MissingLoginInfo)
    } else {
        Inbound::Notice(text.to_string())
    }
}

/// Build a [`ChatMessage`] from a PRIVMSG. A PRIVMSG missing its target or
/// sender hands the command back as the error.
fn chat_message(msg: Message) -> Result<ChatMessage, String> {
    let login = match msg.source_nick() {
        Some(nick) => nick.to_string(),
        None => return Err(msg.command),
    };
    if msg.params.len() < 2 {
        return Err(msg.command);
    }
    let channel = msg.params[0].trim_start_matches('#').to_string();
    let body = msg.params[msg.params.len() - 1].as_str();

    let (message, is_action) = match body
        .strip_prefix("\u{1}ACTION ")
        .map(|rest| rest.strip_suffix('\u{1}').unwrap_or(rest))
    {
        Some(action) => (action.to_string(), true),
        None => (body.to_string(), false),
    };

    let display_name = msg
        .tags
        .display_name()
        .map(str::to_string)
        .unwrap_or_else(|| login.clone());

    Ok(ChatMessage {
        channel,
        login,
        display_name,
        message,
        is_action,
        tags: msg.tags,
    })
}
