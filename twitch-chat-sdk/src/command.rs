//! Outbound IRC commands and their wire text.

use std::fmt;

/// Capabilities requested on every login.
pub const CAPABILITIES: &str = "twitch.tv/tags twitch.tv/commands";

/// A command the client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `PASS oauth:<token>`; `None` sends an empty token (anonymous login).
    Pass(Option<String>),
    Nick(String),
    CapReq,
    Join(String),
    Part(String),
    Privmsg { channel: String, text: String },
    Pong(String),
    /// Preformatted line, sent as-is.
    Raw(String),
}

impl Command {
    pub fn join(channel: &str) -> Self {
        Command::Join(normalize_channel(channel))
    }

    pub fn part(channel: &str) -> Self {
        Command::Part(normalize_channel(channel))
    }

    pub fn privmsg(channel: &str, text: impl Into<String>) -> Self {
        Command::Privmsg {
            channel: normalize_channel(channel),
            text: text.into(),
        }
    }

    /// Wire text with any token replaced, for logging.
    pub fn redacted(&self) -> String {
        match self {
            Command::Pass(_) => "PASS oauth:***".to_string(),
            Command::Raw(line) if line.starts_with("PASS ") => "PASS ***".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Pass(token) => {
                let token = token.as_deref().unwrap_or("").trim();
                let token = token.strip_prefix("oauth:").unwrap_or(token);
                write!(f, "PASS oauth:{token}")
            }
            Command::Nick(nick) => write!(f, "NICK {nick}"),
            Command::CapReq => write!(f, "CAP REQ :{CAPABILITIES}"),
            Command::Join(channel) => write!(f, "JOIN #{channel}"),
            Command::Part(channel) => write!(f, "PART #{channel}"),
            Command::Privmsg { channel, text } => write!(f, "PRIVMSG #{channel} :{text}"),
            Command::Pong(token) => write!(f, "PONG :{token}"),
            Command::Raw(line) => f.write_str(line),
        }
    }
}

/// Lower-case and strip a leading `#`.
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

/// Nickname Twitch accepts for read-only anonymous logins.
pub fn anonymous_nick() -> String {
    use rand::Rng;
    format!("justinfan{}", rand::thread_rng().gen_range(1000..=9999))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_text() {
        assert_eq!(Command::Pass(None).to_string(), "PASS oauth:");
        assert_eq!(Command::Pass(Some("abc".into())).to_string(), "PASS oauth:abc");
        assert_eq!(Command::Pass(Some("oauth:abc".into())).to_string(), "PASS oauth:abc");
        assert_eq!(Command::Nick("foo".into()).to_string(), "NICK foo");
        assert_eq!(
            Command::CapReq.to_string(),
            "CAP REQ :twitch.tv/tags twitch.tv/commands"
        );
        assert_eq!(Command::join("#Bar").to_string(), "JOIN #bar");
        assert_eq!(Command::part("Bar").to_string(), "PART #bar");
        assert_eq!(
            Command::privmsg("bar", "hello there").to_string(),
            "PRIVMSG #bar :hello there"
        );
        assert_eq!(Command::Pong("tmi.twitch.tv".into()).to_string(), "PONG :tmi.twitch.tv");
    }

    #[test]
    fn redacted_hides_token() {
        let cmd = Command::Pass(Some("secret".into()));
        assert_eq!(cmd.redacted(), "PASS oauth:***");
        assert_eq!(Command::Nick("a".into()).redacted(), "NICK a");
    }

    #[test]
    fn anonymous_nick_range() {
        for _ in 0..50 {
            let nick = anonymous_nick();
            let n: u32 = nick.strip_prefix("justinfan").unwrap().parse().unwrap();
            assert!((1000..=9999).contains(&n));
        }
    }
}
