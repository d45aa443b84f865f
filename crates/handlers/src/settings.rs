//! Per-user notification settings and where they are kept.

use std::collections::HashMap;

use {
    anyhow::Result,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
};

/// The kinds of notification a user can switch on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    PostAfterMe,
    PostMentionedMe,
    PostOnMyChannel,
    PostOnSubscribedChannel,
    FollowMyChannel,
    FollowRequest,
}

/// Settings row, keyed by bare jid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub jid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub post_after_me: bool,
    pub post_mentioned_me: bool,
    pub post_on_my_channel: bool,
    pub post_on_subscribed_channel: bool,
    pub follow_my_channel: bool,
    pub follow_request: bool,
}

impl NotificationSettings {
    /// Defaults for a user who has not chosen anything yet. Posts on
    /// subscribed channels are opt-in; everything else is on.
    pub fn new(jid: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            email: None,
            post_after_me: true,
            post_mentioned_me: true,
            post_on_my_channel: true,
            post_on_subscribed_channel: false,
            follow_my_channel: true,
            follow_request: true,
        }
    }

    pub fn enabled(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::PostAfterMe => self.post_after_me,
            NotificationKind::PostMentionedMe => self.post_mentioned_me,
            NotificationKind::PostOnMyChannel => self.post_on_my_channel,
            NotificationKind::PostOnSubscribedChannel => self.post_on_subscribed_channel,
            NotificationKind::FollowMyChannel => self.follow_my_channel,
            NotificationKind::FollowRequest => self.follow_request,
        }
    }

    /// Address to notify, when the user gave a usable one.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.trim().is_empty())
    }
}

/// Persistence for notification settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, jid: &str) -> Result<Option<NotificationSettings>>;
    async fn upsert(&self, settings: NotificationSettings) -> Result<()>;
    /// Returns whether a row was removed.
    async fn delete(&self, jid: &str) -> Result<bool>;
}

// ── In-memory implementation ────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySettingsStore {
    rows: RwLock<HashMap<String, NotificationSettings>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(&self, jid: &str) -> Result<Option<NotificationSettings>> {
        Ok(self.rows.read().await.get(jid).cloned())
    }

    async fn upsert(&self, settings: NotificationSettings) -> Result<()> {
        self.rows
            .write()
            .await
            .insert(settings.jid.clone(), settings);
        Ok(())
    }

    async fn delete(&self, jid: &str) -> Result<bool> {
        Ok(self.rows.write().await.remove(jid).is_some())
    }
}

// ── SQLite-backed implementation ────────────────────────────────────

pub struct SqliteSettingsStore {
    pool: sqlx::SqlitePool,
}

type SettingsRow = (String, Option<String>, bool, bool, bool, bool, bool, bool);

impl SqliteSettingsStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options: sqlx::sqlite::SqliteConnectOptions = url.parse()?;
        let pool = sqlx::SqlitePool::connect_with(options.create_if_missing(true)).await?;
        crate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn get(&self, jid: &str) -> Result<Option<NotificationSettings>> {
        let row = sqlx::query_as::<_, SettingsRow>(
            "SELECT jid, email, post_after_me, post_mentioned_me, post_on_my_channel,
                    post_on_subscribed_channel, follow_my_channel, follow_request
             FROM notification_settings
             WHERE jid = ?",
        )
        .bind(jid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| NotificationSettings {
            jid: r.0,
            email: r.1,
            post_after_me: r.2,
            post_mentioned_me: r.3,
            post_on_my_channel: r.4,
            post_on_subscribed_channel: r.5,
            follow_my_channel: r.6,
            follow_request: r.7,
        }))
    }

    async fn upsert(&self, settings: NotificationSettings) -> Result<()> {
        sqlx::query(
            "INSERT INTO notification_settings
             (jid, email, post_after_me, post_mentioned_me, post_on_my_channel,
              post_on_subscribed_channel, follow_my_channel, follow_request)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(jid) DO UPDATE SET
                email = excluded.email,
                post_after_me = excluded.post_after_me,
                post_mentioned_me = excluded.post_mentioned_me,
                post_on_my_channel = excluded.post_on_my_channel,
                post_on_subscribed_channel = excluded.post_on_subscribed_channel,
                follow_my_channel = excluded.follow_my_channel,
                follow_request = excluded.follow_request",
        )
        .bind(&settings.jid)
        .bind(&settings.email)
        .bind(settings.post_after_me)
        .bind(settings.post_mentioned_me)
        .bind(settings.post_on_my_channel)
        .bind(settings.post_on_subscribed_channel)
        .bind(settings.follow_my_channel)
        .bind(settings.follow_request)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, jid: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notification_settings WHERE jid = ?")
            .bind(jid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
