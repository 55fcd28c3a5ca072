//! Twitch command rate limits.

use std::time::Duration;

use crate::irc::IrcTags;

/// Allowed commands per rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub count: usize,
    pub window: Duration,
}

impl RateLimit {
    /// Regular chatters: 20 commands per 30 seconds.
    pub const REGULAR: RateLimit = RateLimit {
        count: 20,
        window: Duration::from_secs(30),
    };

    /// Broadcaster and moderators: 100 commands per 30 seconds.
    pub const PRIVILEGED: RateLimit = RateLimit {
        count: 100,
        window: Duration::from_secs(30),
    };
}

/// Which limit applies to the logged-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitRole {
    #[default]
    Regular,
    Privileged,
}

impl RateLimitRole {
    /// Privileged if the user's badges include `broadcaster` or `moderator`.
    pub fn from_tags(tags: &IrcTags) -> Self {
        if tags.has_badge("broadcaster") || tags.has_badge("moderator") {
            RateLimitRole::Privileged
        } else {
            RateLimitRole::Regular
        }
    }

    pub fn limit(self) -> RateLimit {
        match self {
            RateLimitRole::Regular => RateLimit::REGULAR,
            RateLimitRole::Privileged => RateLimit::PRIVILEGED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_from_badges() {
        let role = |raw: &str| RateLimitRole::from_tags(&IrcTags::parse(raw));
        assert_eq!(role("badges=broadcaster/1"), RateLimitRole::Privileged);
        assert_eq!(role("badges=moderator/1,subscriber/3"), RateLimitRole::Privileged);
        assert_eq!(role("badges=subscriber/3"), RateLimitRole::Regular);
        assert_eq!(role(""), RateLimitRole::Regular);
    }

    #[test]
    fn limits() {
        assert_eq!(RateLimitRole::Regular.limit().count, 20);
        assert_eq!(RateLimitRole::Privileged.limit().count, 100);
        assert_eq!(RateLimitRole::Privileged.limit().window, Duration::from_secs(30));
    }
}
