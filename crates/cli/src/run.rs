//! Wiring for `pusher run`.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    pusher_component::{ComponentSettings, PusherComponent, connect_tcp},
    pusher_config::{PusherConfig, Severity, validate_config},
    pusher_handlers::{
        HandlerDeps, InMemorySettingsStore, LogMailer, Mailer, NotificationOutbox, SettingsStore,
        SpoolMailer, SqliteSettingsStore, TemplateRenderer, handler_tables,
    },
    pusher_protocol::{Handshake, PROTOCOL_VERSION},
    secrecy::ExposeSecret,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

/// How long queued notifications get to drain on shutdown.
const OUTBOX_DRAIN: Duration = Duration::from_secs(5);

/// Refuse to start on config errors `check-config` would report.
fn ensure_runnable(config: &PusherConfig) -> anyhow::Result<()> {
    let result = validate_config(config);
    if !result.has_errors() {
        return Ok(());
    }
    let errors: Vec<String> = result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| format!("{}: {}", d.path, d.message))
        .collect();
    anyhow::bail!("invalid configuration: {}", errors.join("; "))
}

pub async fn run(config: PusherConfig) -> anyhow::Result<()> {
    ensure_runnable(&config)?;

    let store: Arc<dyn SettingsStore> = match config.store.database_url.as_deref() {
        Some(url) => {
            let store = SqliteSettingsStore::connect(url)
                .await
                .with_context(|| format!("opening settings database {url}"))?;
            info!(url, "settings store ready");
            Arc::new(store)
        },
        None => {
            warn!("no store.database_url configured, settings are kept in memory");
            Arc::new(InMemorySettingsStore::new())
        },
    };

    let notifications = &config.notifications;
    let mailer: Arc<dyn Mailer> = match &notifications.spool_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "spooling notification mail");
            Arc::new(SpoolMailer::new(dir))
        },
        None => Arc::new(LogMailer),
    };
    let (outbox, worker) = NotificationOutbox::spawn(
        TemplateRenderer::new(&notifications.template_dir),
        mailer,
        notifications.from_address.clone(),
    );

    let handshake = Handshake {
        protocol: PROTOCOL_VERSION,
        component: config.component.jid.clone(),
        secret: config
            .component
            .secret
            .as_ref()
            .map(|s| s.expose_secret().clone())
            .unwrap_or_default(),
    };
    let (sink, inbound) = connect_tcp(&config.component.host, config.component.port, handshake)
        .await
        .with_context(|| {
            format!(
                "connecting to {}:{}",
                config.component.host, config.component.port
            )
        })?;

    let builder = PusherComponent::builder(
        ComponentSettings {
            jid: config.component.jid.clone(),
            channel_server: config.pubsub.channel_server.clone(),
            reply_timeout: config.pubsub.reply_timeout(),
        },
        Arc::new(sink),
    );
    let deps = HandlerDeps {
        store,
        sender: Arc::new(outbox),
        pubsub: builder.pubsub(),
        from_address: notifications.from_address.clone(),
    };
    let component = builder.finish(handler_tables(&deps)?);
    drop(deps);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C");
                cancel.cancel();
            }
        });
    }

    component.run(inbound, cancel).await;
    drop(component);

    if tokio::time::timeout(OUTBOX_DRAIN, worker).await.is_err() {
        warn!("notification outbox still busy at shutdown");
    }
    info!("pusher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_reply_timeout_is_refused() {
        let mut config = PusherConfig::default();
        config.pubsub.reply_timeout_secs = 0;
        let err = ensure_runnable(&config).unwrap_err().to_string();
        assert!(err.contains("pubsub.reply_timeout_secs"), "{err}");
    }

    #[test]
    fn default_config_is_runnable() {
        assert!(ensure_runnable(&PusherConfig::default()).is_ok());
    }
}
