//! IRC line parsing and IRCv3 message tags.
//!
//! A line looks like `@key=value;... :prefix COMMAND param param :trailing`.
//! Only the pieces Twitch chat uses are modelled; anything unparseable is
//! reported as `None` and left to the caller to log.

use std::collections::HashMap;
use std::fmt::Write;

/// A parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub tags: IrcTags,
    pub prefix: Option<String>,
    pub command: String,
    /// Middle params followed by the trailing param, if any.
    pub params: Vec<String>,
}

impl Message {
    /// Parse one line. Trailing CR/LF is ignored.
    ///
    /// Returns `None` for empty lines and lines without a command.
    pub fn parse(line: &str) -> Option<Message> {
        let mut rest = line.trim_end_matches(['\r', '\n']).trim_start();

        let mut tags = IrcTags::default();
        if let Some(after_at) = rest.strip_prefix('@') {
            let (raw_tags, remainder) = after_at.split_once(' ')?;
            tags = IrcTags::parse(raw_tags);
            rest = remainder.trim_start();
        }

        let mut prefix = None;
        if let Some(after_colon) = rest.strip_prefix(':') {
            let (raw_prefix, remainder) = after_colon.split_once(' ')?;
            prefix = Some(raw_prefix.to_string());
            rest = remainder.trim_start();
        }

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };

        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?.to_ascii_uppercase();
        if !command.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }

        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Message {
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Nickname part of the prefix (`nick!user@host` → `nick`).
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split('!').next().unwrap_or(prefix);
        (!nick.is_empty()).then_some(nick)
    }

    /// Last parameter, which is the trailing text for most commands.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

/// IRCv3 tag set attached to a line.
///
/// Keys are unique; a repeated key keeps the last value, per IRCv3
/// message-tags. Values are stored unescaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrcTags {
    map: HashMap<String, String>,
}

/// One `name/version` entry of the `badges` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Badge<'a> {
    pub name: &'a str,
    pub version: &'a str,
}

impl IrcTags {
    /// Parse the tag segment of a line, without the leading `@`.
    pub fn parse(raw: &str) -> IrcTags {
        let mut map = HashMap::new();
        for pair in raw.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key.is_empty() {
                continue;
            }
            map.insert(key.to_string(), unescape_tag_value(value));
        }
        IrcTags { map }
    }

    /// Serialize back to wire form (no leading `@`), keys sorted.
    pub fn to_wire(&self) -> String {
        let mut keys: Vec<&String> = self.map.keys().collect();
        keys.sort();
        let mut out = String::new();
        for (i, key) in keys.into_iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            out.push_str(key);
            out.push('=');
            escape_tag_value(&mut out, &self.map[key]);
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `display-name`, if present and non-empty.
    pub fn display_name(&self) -> Option<&str> {
        self.get("display-name").filter(|v| !v.is_empty())
    }

    /// `color` as sent (`#RRGGBB`), if the user has set one.
    pub fn color(&self) -> Option<&str> {
        self.get("color").filter(|v| !v.is_empty())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.get("user-id").filter(|v| !v.is_empty())
    }

    /// Entries of the `badges` tag, e.g. `broadcaster/1,subscriber/12`.
    pub fn badges(&self) -> impl Iterator<Item = Badge<'_>> {
        self.get("badges")
            .unwrap_or("")
            .split(',')
            .filter_map(|entry| {
                let (name, version) = entry.split_once('/')?;
                (!name.is_empty()).then_some(Badge { name, version })
            })
    }

    pub fn has_badge(&self, name: &str) -> bool {
        self.badges().any(|b| b.name == name)
    }
}

impl FromIterator<(String, String)> for IrcTags {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        IrcTags {
            map: iter.into_iter().collect(),
        }
    }
}

/// Escape a tag value for the wire.
pub fn escape_tag_value(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => {
                let _ = out.write_char(c);
            }
        }
    }
}

/// Reverse [`escape_tag_value`]. Unknown escapes drop the backslash; a
/// trailing lone backslash is dropped.
pub fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_tagged_privmsg() {
        let msg = Message::parse(
            "@badge-info=;badges=broadcaster/1;display-name=Foo;color=#FF0000 \
             :foo!foo@foo.tmi.twitch.tv PRIVMSG #bar :hello world\r\n",
        )
        .unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.source_nick(), Some("foo"));
        assert_eq!(msg.params, vec!["#bar", "hello world"]);
        assert_eq!(msg.tags.display_name(), Some("Foo"));
        assert_eq!(msg.tags.color(), Some("#FF0000"));
        assert_eq!(msg.tags.get("badge-info"), Some(""));
    }

    #[test]
    fn parse_untagged_and_prefixless() {
        let msg = Message::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(msg.command, "PING");
        assert!(msg.prefix.is_none());
        assert!(msg.tags.is_empty());
        assert_eq!(msg.trailing(), Some("tmi.twitch.tv"));

        let msg = Message::parse(":tmi.twitch.tv 001 justinfan1234 :Welcome, GLHF!").unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.source_nick(), Some("tmi.twitch.tv"));
        assert_eq!(msg.params, vec!["justinfan1234", "Welcome, GLHF!"]);
    }

    #[test]
    fn trailing_keeps_inner_colons() {
        let msg = Message::parse(":a!a@a PRIVMSG #c :see: this :)").unwrap();
        assert_eq!(msg.trailing(), Some("see: this :)"));
    }

    #[test]
    fn malformed_lines_are_none() {
        assert!(Message::parse("").is_none());
        assert!(Message::parse("   \r\n").is_none());
        assert!(Message::parse("@only-tags").is_none());
        assert!(Message::parse(":prefix.only").is_none());
        assert!(Message::parse(":prefix ").is_none());
        assert!(Message::parse("@a=b :p.x ???").is_none());
    }

    #[test]
    fn tags_unescape() {
        let tags = IrcTags::parse(r"msg=a\:b\sc\\d\re\nf;flag");
        assert_eq!(tags.get("msg"), Some("a;b c\\d\re\nf"));
        assert_eq!(tags.get("flag"), Some(""));
    }

    #[test]
    fn duplicate_key_keeps_last() {
        let tags = IrcTags::parse("color=#000000;color=#FFFFFF");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.color(), Some("#FFFFFF"));
    }

    #[test]
    fn unknown_escape_and_trailing_backslash() {
        assert_eq!(unescape_tag_value(r"a\xb"), "axb");
        assert_eq!(unescape_tag_value("end\\"), "end");
    }

    #[test]
    fn has_badge_matches_names_only() {
        let tags = IrcTags::parse("badges=moderator/1,subscriber/12");
        assert!(tags.has_badge("moderator"));
        assert!(tags.has_badge("subscriber"));
        assert!(!tags.has_badge("broadcaster"));
        assert!(!tags.has_badge("1"));
        assert_eq!(tags.badges().count(), 2);
    }

    #[test]
    fn has_badge_false_when_absent_or_empty() {
        assert!(!IrcTags::default().has_badge("broadcaster"));
        assert!(!IrcTags::parse("badges=").has_badge("broadcaster"));
    }

    proptest! {
        #[test]
        fn tags_survive_encode_decode(
            entries in proptest::collection::hash_map(
                "[a-z][a-z0-9-]{0,12}",
                "[ -~\\r\\n;\\\\]{0,24}",
                0..8,
            )
        ) {
            let tags: IrcTags = entries.clone().into_iter().collect();
            let decoded = IrcTags::parse(&tags.to_wire());
            prop_assert_eq!(decoded, tags);
        }
    }
}
