//! Outbound email notifications.
//!
//! Handlers hand a [`Notification`] to a [`NotificationSender`] and move on.
//! The [`NotificationOutbox`] queues it for a worker task that renders the
//! template and passes the mail to a [`Mailer`]. Rendering and delivery
//! failures are logged and never reach the handler.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    pusher_common::{Error, Result},
    rand::{Rng, distr::Alphanumeric},
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, info, warn},
};

/// A templated mail for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Template name, without the `.tpl` extension.
    pub template: String,
    /// Recipient email address.
    pub to: String,
    /// `{{TOKEN}}` substitutions.
    pub tokens: BTreeMap<String, String>,
}

/// Fire-and-forget hand-off of notifications.
pub trait NotificationSender: Send + Sync {
    fn push(&self, notification: Notification);
}

/// A rendered mail ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Mail {
    /// RFC 5322-style text of the mail.
    pub fn to_eml(&self) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
            self.from, self.to, self.subject, self.body
        )
    }
}

// ── Templates ───────────────────────────────────────────────────────

/// Renders `<dir>/<template>.tpl`.
///
/// A leading `Subject: ...` line becomes the subject; otherwise the template
/// name is used.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    dir: PathBuf,
}

impl TemplateRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn render(&self, notification: &Notification, from: &str) -> Result<Mail> {
        let path = self.dir.join(format!("{}.tpl", notification.template));
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::external(format!("read template {}", path.display()), e))?;
        let text = substitute(&raw, &notification.tokens);

        let (subject, body) = match text.split_once('\n') {
            Some((first, rest)) if first.starts_with("Subject:") => (
                first.trim_start_matches("Subject:").trim().to_string(),
                rest.trim_start_matches(['\r', '\n']).to_string(),
            ),
            _ => (notification.template.clone(), text),
        };

        Ok(Mail {
            from: from.to_string(),
            to: notification.to.clone(),
            subject,
            body,
        })
    }
}

/// Replace every `{{KEY}}` with its token. Unknown keys are left as-is.
pub fn substitute(template: &str, tokens: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                match tokens.get(key.trim()) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    },
                }
                rest = &after[end + 2..];
            },
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            },
        }
    }
    out.push_str(rest);
    out
}

// ── Delivery ────────────────────────────────────────────────────────

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, mail: &Mail) -> Result<()>;
}

/// Writes each mail as an `.eml` file into a spool directory for an
/// external MTA to pick up.
pub struct SpoolMailer {
    dir: PathBuf,
}

impl SpoolMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_name() -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        format!("{millis}-{suffix}.eml")
    }
}

#[async_trait]
impl Mailer for SpoolMailer {
    async fn deliver(&self, mail: &Mail) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name());
        tokio::fs::write(&path, mail.to_eml()).await?;
        debug!(path = %path.display(), to = %mail.to, "spooled mail");
        Ok(())
    }
}

/// Logs mails instead of sending them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, mail: &Mail) -> Result<()> {
        info!(to = %mail.to, subject = %mail.subject, bytes = mail.body.len(), "mail (not sent)");
        Ok(())
    }
}

// ── Outbox ──────────────────────────────────────────────────────────

/// Queue drained by a background worker.
#[derive(Clone)]
pub struct NotificationOutbox {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationOutbox {
    /// Start the worker. It exits once every outbox handle is dropped and
    /// the queue is drained.
    pub fn spawn(
        renderer: TemplateRenderer,
        mailer: Arc<dyn Mailer>,
        from: impl Into<String>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        let from = from.into();
        let worker = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                let mail = match renderer.render(&notification, &from).await {
                    Ok(mail) => mail,
                    Err(e) => {
                        warn!(template = %notification.template, error = %e, "could not render notification");
                        continue;
                    },
                };
                if let Err(e) = mailer.deliver(&mail).await {
                    warn!(to = %mail.to, error = %e, "could not deliver notification");
                }
            }
            debug!("notification outbox closed");
        });
        (Self { tx }, worker)
    }
}

impl NotificationSender for NotificationOutbox {
    fn push(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            warn!("notification worker is gone, dropping notification");
        }
    }
}
