//! Persistent configuration for the twitch-chat CLI.
//!
//! Config file lives at `~/.config/twitch-chat/config.toml` unless
//! `--config` points elsewhere. Connection tuning goes under `[client]`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use twitch_chat_sdk::{ClientConfig, Credentials};

/// User configuration (persisted in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Channel to join on start.
    pub channel: Option<String>,
    /// Account login; needed together with `token` for a writable session.
    pub login: Option<String>,
    /// OAuth token. Prefer the TWITCH_OAUTH_TOKEN env var.
    pub token: Option<String>,
    /// Server address and loop tuning.
    #[serde(default)]
    pub client: ClientConfig,
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("twitch-chat")
        .join("config.toml")
}

impl Config {
    /// Read `path`. A missing file is the default config; a broken one is
    /// reported and ignored.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match Self::parse(&s) {
                    Ok(c) => return c,
                    Err(e) => eprintln!("Warning: bad config file {}: {e}", path.display()),
                },
                Err(e) => eprintln!("Warning: can't read {}: {e}", path.display()),
            }
        }
        Self::default()
    }

    pub fn parse(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

/// Effective settings after merging CLI args > config file > defaults.
#[derive(Debug)]
pub struct Resolved {
    pub client: ClientConfig,
    pub channel: String,
    pub credentials: Credentials,
}

impl Resolved {
    pub fn merge(cli: &super::Args, config: Config) -> Self {
        let mut client = config.client;
        if let Some(server) = &cli.server {
            client.address = server.clone();
        }
        if let Some(port) = cli.port {
            client.port = port;
        }

        let channel = cli
            .channel
            .clone()
            .or(config.channel)
            .unwrap_or_default();

        let login = cli.login.clone().or(config.login);
        let token = cli.token.clone().or(config.token);
        let credentials = match (login, token) {
            (Some(login), Some(token)) => Credentials::with_token(login, token),
            (login, token) => Credentials { token, login },
        };

        Self {
            client,
            channel,
            credentials,
        }
    }
}
