//! Handlers for requests users send to the pusher.

use std::{collections::BTreeMap, sync::Arc};

use {
    async_trait::async_trait,
    pusher_common::{bare_jid, local_part},
    pusher_component::{HandlerResult, IqGateway, QueryHandler, info_reply},
    pusher_protocol::{Iq, Query, StanzaError, ns},
    rand::{Rng, distr::Alphanumeric},
    serde::Deserialize,
    serde_json::json,
    tracing::info,
};

use crate::{
    error::{Context, Error, Result},
    notify::{Notification, NotificationSender},
    settings::{NotificationSettings, SettingsStore},
};

const PASSWORD_LEN: usize = 10;

/// Bare jid of the requesting user.
fn requester(iq: &Iq) -> Result<&str> {
    iq.from
        .as_deref()
        .map(bare_jid)
        .filter(|jid| !jid.is_empty())
        .context("Request has no sender address.")
}

fn settings_reply(settings: &NotificationSettings) -> HandlerResult {
    Query::from_payload(ns::NOTIFICATION_SETTINGS, settings)
        .map(Some)
        .map_err(|e| StanzaError::internal(e.to_string()))
}

// ── notification-settings ───────────────────────────────────────────

/// `get`: the requester's settings, or the defaults if none are stored.
pub struct GetNotificationSettings {
    store: Arc<dyn SettingsStore>,
}

impl GetNotificationSettings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    async fn run(&self, iq: &Iq) -> Result<NotificationSettings> {
        let jid = requester(iq)?;
        let stored = self.store.get(jid).await.map_err(Error::store)?;
        Ok(stored.unwrap_or_else(|| NotificationSettings::new(jid)))
    }
}

#[async_trait]
impl QueryHandler for GetNotificationSettings {
    fn namespace(&self) -> &str {
        ns::NOTIFICATION_SETTINGS
    }

    async fn handle(&self, iq: &Iq) -> HandlerResult {
        settings_reply(&self.run(iq).await?)
    }
}

/// Fields a `set` may change; absent fields keep their value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsUpdate {
    email: Option<String>,
    post_after_me: Option<bool>,
    post_mentioned_me: Option<bool>,
    post_on_my_channel: Option<bool>,
    post_on_subscribed_channel: Option<bool>,
    follow_my_channel: Option<bool>,
    follow_request: Option<bool>,
}

impl SettingsUpdate {
    fn apply(self, settings: &mut NotificationSettings) {
        if let Some(email) = self.email {
            settings.email = Some(email).filter(|e| !e.trim().is_empty());
        }
        let flags = [
            (self.post_after_me, &mut settings.post_after_me),
            (self.post_mentioned_me, &mut settings.post_mentioned_me),
            (self.post_on_my_channel, &mut settings.post_on_my_channel),
            (
                self.post_on_subscribed_channel,
                &mut settings.post_on_subscribed_channel,
            ),
            (self.follow_my_channel, &mut settings.follow_my_channel),
            (self.follow_request, &mut settings.follow_request),
        ];
        for (value, slot) in flags {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

/// `set`: update the requester's settings and return the result.
pub struct SetNotificationSettings {
    store: Arc<dyn SettingsStore>,
}

impl SetNotificationSettings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    async fn run(&self, iq: &Iq) -> Result<NotificationSettings> {
        let jid = requester(iq)?;
        let update: SettingsUpdate = match iq.query.as_ref() {
            Some(query) if !query.body.is_null() => query
                .parse()
                .map_err(|e| Error::bad_request(format!("Invalid settings: {e}")))?,
            _ => SettingsUpdate::default(),
        };

        let mut settings = self
            .store
            .get(jid)
            .await
            .map_err(Error::store)?
            .unwrap_or_else(|| NotificationSettings::new(jid));
        update.apply(&mut settings);
        self.store
            .upsert(settings.clone())
            .await
            .map_err(Error::store)?;
        Ok(settings)
    }
}

#[async_trait]
impl QueryHandler for SetNotificationSettings {
    fn namespace(&self) -> &str {
        ns::NOTIFICATION_SETTINGS
    }

    async fn handle(&self, iq: &Iq) -> HandlerResult {
        settings_reply(&self.run(iq).await?)
    }
}

// ── metadata ────────────────────────────────────────────────────────

/// `get`: what kind of pusher this is and where its mail comes from.
pub struct Metadata {
    from_address: String,
}

impl Metadata {
    pub fn new(from_address: impl Into<String>) -> Self {
        Self {
            from_address: from_address.into(),
        }
    }
}

#[async_trait]
impl QueryHandler for Metadata {
    fn namespace(&self) -> &str {
        ns::METADATA
    }

    async fn handle(&self, _iq: &Iq) -> HandlerResult {
        Ok(Some(Query::new(
            ns::METADATA,
            serde_json::json!({
                "type": "email",
                "address": self.from_address,
                "version": env!("CARGO_PKG_VERSION"),
            }),
        )))
    }
}

// ── signup / unregister ─────────────────────────────────────────────

/// `set`: register the requester's email, keeping existing preferences.
pub struct Signup {
    store: Arc<dyn SettingsStore>,
}

impl Signup {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    async fn run(&self, iq: &Iq) -> Result<String> {
        let jid = requester(iq)?;
        let email = iq
            .query
            .as_ref()
            .and_then(|q| q.text("email"))
            .context("You must provide an email address.")?;

        let mut settings = self
            .store
            .get(jid)
            .await
            .map_err(Error::store)?
            .unwrap_or_else(|| NotificationSettings::new(jid));
        settings.email = Some(email.to_string());
        self.store.upsert(settings).await.map_err(Error::store)?;

        info!(jid, "user signed up");
        Ok(format!("User [{jid}] signed up with email [{email}]."))
    }
}

#[async_trait]
impl QueryHandler for Signup {
    fn namespace(&self) -> &str {
        ns::SIGNUP
    }

    async fn handle(&self, iq: &Iq) -> HandlerResult {
        info_reply(ns::SIGNUP, self.run(iq).await?)
    }
}

/// `set`: forget the requester.
pub struct Unregister {
    store: Arc<dyn SettingsStore>,
}

impl Unregister {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    async fn run(&self, iq: &Iq) -> Result<String> {
        let jid = requester(iq)?;
        if self.store.delete(jid).await.map_err(Error::store)? {
            info!(jid, "user unregistered");
            Ok(format!("User [{jid}] unregistered."))
        } else {
            Ok(format!("User [{jid}] was not registered."))
        }
    }
}

#[async_trait]
impl QueryHandler for Unregister {
    fn namespace(&self) -> &str {
        ns::UNREGISTER
    }

    async fn handle(&self, iq: &Iq) -> HandlerResult {
        info_reply(ns::UNREGISTER, self.run(iq).await?)
    }
}

// ── password-reset ──────────────────────────────────────────────────

/// `set`: give a registered user a new password on their server and mail it
/// to them. The user is named in the request since they cannot log in.
pub struct PasswordReset {
    store: Arc<dyn SettingsStore>,
    sender: Arc<dyn NotificationSender>,
    gateway: Arc<IqGateway>,
}

impl PasswordReset {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        sender: Arc<dyn NotificationSender>,
        gateway: Arc<IqGateway>,
    ) -> Self {
        Self {
            store,
            sender,
            gateway,
        }
    }

    async fn run(&self, iq: &Iq) -> Result<String> {
        let jid = iq
            .query
            .as_ref()
            .and_then(|q| q.text("username"))
            .map(bare_jid)
            .context("You must provide the username.")?;
        let Some((_, domain)) = jid
            .split_once('@')
            .filter(|(local, domain)| !local.is_empty() && !domain.is_empty())
        else {
            return Err(Error::bad_request(format!("[{jid}] is not a valid jid.")));
        };

        let settings = self.store.get(jid).await.map_err(Error::store)?;
        let email = settings
            .as_ref()
            .and_then(NotificationSettings::email)
            .ok_or_else(|| Error::not_found(format!("User [{jid}] has no registered email.")))?;

        let password = new_password();
        let change = Iq::set(
            domain,
            Query::new(
                ns::REGISTER,
                json!({ "username": local_part(jid), "password": password }),
            ),
        );
        self.gateway.query(change).await?;

        let tokens: BTreeMap<String, String> = [
            ("FIRST_PART_JID", local_part(jid)),
            ("NEW_PASSWORD", password.as_str()),
            ("EMAIL", email),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        self.sender.push(Notification {
            template: "password-reset".to_string(),
            to: email.to_string(),
            tokens,
        });

        info!(jid, "password reset");
        Ok(format!("Password of [{jid}] reset, new password sent by email."))
    }
}

fn new_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[async_trait]
impl QueryHandler for PasswordReset {
    fn namespace(&self) -> &str {
        ns::PASSWORD_RESET
    }

    async fn handle(&self, iq: &Iq) -> HandlerResult {
        info_reply(ns::PASSWORD_RESET, self.run(iq).await?)
    }
}
