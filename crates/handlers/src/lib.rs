//! Query handlers of the pusher and the collaborators they use.
//!
//! - `external`: requests from users (`notification-settings`, `metadata`,
//!   `signup`, `unregister`, `password-reset`)
//! - `loopback`: domain events raised by the component itself
//! - `settings`: notification settings storage
//! - `notify`: templated email notifications

pub mod error;
pub mod external;
pub mod loopback;
pub mod notify;
pub mod settings;

use std::sync::Arc;

use pusher_component::{HandlerTables, PubsubClient, TrafficClass};

pub use {
    error::{Error, Result},
    notify::{
        LogMailer, Mail, Mailer, Notification, NotificationOutbox, NotificationSender,
        SpoolMailer, TemplateRenderer,
    },
    settings::{
        InMemorySettingsStore, NotificationKind, NotificationSettings, SettingsStore,
        SqliteSettingsStore,
    },
};

/// Everything the handlers need from the outside.
#[derive(Clone)]
pub struct HandlerDeps {
    pub store: Arc<dyn SettingsStore>,
    pub sender: Arc<dyn NotificationSender>,
    pub pubsub: PubsubClient,
    /// Sender address of notification mails, reported by `metadata`.
    pub from_address: String,
}

/// Build the three handler tables.
pub fn handler_tables(deps: &HandlerDeps) -> pusher_component::Result<HandlerTables> {
    use {
        external::{
            GetNotificationSettings, Metadata, PasswordReset, SetNotificationSettings, Signup,
            Unregister,
        },
        loopback::{DeleteUser, NotifyHandler},
    };

    let store = || Arc::clone(&deps.store);
    let mut builder = HandlerTables::builder();

    builder.register(TrafficClass::Get, Arc::new(GetNotificationSettings::new(store())))?;
    builder.register(TrafficClass::Get, Arc::new(Metadata::new(deps.from_address.clone())))?;

    builder.register(TrafficClass::Set, Arc::new(SetNotificationSettings::new(store())))?;
    builder.register(TrafficClass::Set, Arc::new(Signup::new(store())))?;
    builder.register(TrafficClass::Set, Arc::new(Unregister::new(store())))?;
    builder.register(
        TrafficClass::Set,
        Arc::new(PasswordReset::new(
            store(),
            Arc::clone(&deps.sender),
            Arc::clone(deps.pubsub.gateway()),
        )),
    )?;

    for handler in [
        NotifyHandler::follow_request(deps),
        NotifyHandler::follow_request_approved(deps),
        NotifyHandler::follow_request_denied(deps),
        NotifyHandler::user_followed(deps),
        NotifyHandler::user_unfollowed(deps),
        NotifyHandler::posted_after_my_post(deps),
        NotifyHandler::posted_mention(deps),
        NotifyHandler::posted_on_my_channel(deps),
        NotifyHandler::posted_on_subscribed_channel(deps),
    ] {
        builder.register(TrafficClass::Loopback, Arc::new(handler))?;
    }
    builder.register(TrafficClass::Loopback, Arc::new(DeleteUser::new(store())))?;

    Ok(builder.build())
}

/// Apply the settings schema migrations.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
