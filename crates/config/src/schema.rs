/// Config schema types (component connection, pubsub peer, store, notifications).
use std::{path::PathBuf, time::Duration};

use {
    pusher_protocol::DEFAULT_REPLY_TIMEOUT_SECS,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PusherConfig {
    pub component: ComponentConfig,
    pub pubsub: PubsubConfig,
    pub store: StoreConfig,
    pub notifications: NotificationsConfig,
}

/// How the component attaches to its server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    /// Address the component answers on, e.g. `pusher.example.com`.
    pub jid: String,
    pub host: String,
    pub port: u16,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub secret: Option<Secret<String>>,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            jid: "pusher.localhost".into(),
            host: "127.0.0.1".into(),
            port: 5347,
            secret: None,
        }
    }
}

/// Remote pubsub service queried for affiliations and items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PubsubConfig {
    pub channel_server: String,
    /// Deadline for every synchronous request issued by the component.
    pub reply_timeout_secs: u64,
}

impl Default for PubsubConfig {
    fn default() -> Self {
        Self {
            channel_server: "channels.localhost".into(),
            reply_timeout_secs: DEFAULT_REPLY_TIMEOUT_SECS,
        }
    }
}

impl PubsubConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `sqlite://...` URL. Settings live in memory when unset.
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub template_dir: PathBuf,
    pub from_address: String,
    /// Rendered mails are written here as `.eml` files. Logged when unset.
    pub spool_dir: Option<PathBuf>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("templates"),
            from_address: "pusher@localhost".into(),
            spool_dir: None,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
