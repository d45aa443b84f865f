//! Handlers for domain events raised by the event consumer. Each one works
//! out who should hear about the event and queues a notification for every
//! recipient whose settings allow it.

use std::{collections::BTreeMap, sync::Arc};

use {
    async_trait::async_trait,
    pusher_common::{bare_jid, local_part},
    pusher_component::{HandlerResult, PubsubClient, QueryHandler, info_reply},
    pusher_protocol::{
        Iq, Query,
        events::{DeleteUserEvent, FollowEvent, PostEvent},
        ns,
        pubsub::posts_node,
    },
    tracing::{debug, info},
};

use crate::{
    HandlerDeps,
    error::{Context, Error, Result},
    notify::{Notification, NotificationSender},
    settings::{NotificationKind, SettingsStore},
};

/// Who an event is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    /// The user named in the event.
    Named,
    /// The user who caused the event, e.g. whoever asked to follow.
    Requester,
    /// Owners of the event's channel.
    Owners,
    /// Owners and moderators of the event's channel.
    OwnersAndModerators,
}

#[derive(Debug, Clone, Copy)]
enum Payload {
    Follow,
    Post,
}

pub struct NotifyHandler {
    namespace: &'static str,
    template: &'static str,
    kind: NotificationKind,
    recipients: Recipients,
    payload: Payload,
    store: Arc<dyn SettingsStore>,
    sender: Arc<dyn NotificationSender>,
    pubsub: PubsubClient,
}

impl NotifyHandler {
    fn new(
        deps: &HandlerDeps,
        namespace: &'static str,
        template: &'static str,
        kind: NotificationKind,
        recipients: Recipients,
        payload: Payload,
    ) -> Self {
        Self {
            namespace,
            template,
            kind,
            recipients,
            payload,
            store: Arc::clone(&deps.store),
            sender: Arc::clone(&deps.sender),
            pubsub: deps.pubsub.clone(),
        }
    }

    pub fn follow_request(deps: &HandlerDeps) -> Self {
        Self::new(
            deps,
            ns::FOLLOW_REQUEST,
            "follow-request",
            NotificationKind::FollowRequest,
            Recipients::OwnersAndModerators,
            Payload::Follow,
        )
    }

    pub fn follow_request_approved(deps: &HandlerDeps) -> Self {
        Self::new(
            deps,
            ns::FOLLOW_REQUEST_APPROVED,
            "followrequest-approved",
            NotificationKind::FollowRequest,
            Recipients::Requester,
            Payload::Follow,
        )
    }

    pub fn follow_request_denied(deps: &HandlerDeps) -> Self {
        Self::new(
            deps,
            ns::FOLLOW_REQUEST_DENIED,
            "followrequest-denied",
            NotificationKind::FollowRequest,
            Recipients::Requester,
            Payload::Follow,
        )
    }

    pub fn user_followed(deps: &HandlerDeps) -> Self {
        Self::new(
            deps,
            ns::USER_FOLLOWED,
            "userfollowed",
            NotificationKind::FollowMyChannel,
            Recipients::Owners,
            Payload::Follow,
        )
    }

    pub fn user_unfollowed(deps: &HandlerDeps) -> Self {
        Self::new(
            deps,
            ns::USER_UNFOLLOWED,
            "userunfollowed",
            NotificationKind::FollowMyChannel,
            Recipients::Owners,
            Payload::Follow,
        )
    }

    pub fn posted_after_my_post(deps: &HandlerDeps) -> Self {
        Self::new(
            deps,
            ns::USER_POSTED_AFTER_MY_POST,
            "userposted-aftermypost",
            NotificationKind::PostAfterMe,
            Recipients::Named,
            Payload::Post,
        )
    }

    pub fn posted_mention(deps: &HandlerDeps) -> Self {
        Self::new(
            deps,
            ns::USER_POSTED_MENTION,
            "userposted-mention",
            NotificationKind::PostMentionedMe,
            Recipients::Named,
            Payload::Post,
        )
    }

    pub fn posted_on_my_channel(deps: &HandlerDeps) -> Self {
        Self::new(
            deps,
            ns::USER_POSTED_ON_MY_CHANNEL,
            "userposted-onmychannel",
            NotificationKind::PostOnMyChannel,
            Recipients::Owners,
            Payload::Post,
        )
    }

    pub fn posted_on_subscribed_channel(deps: &HandlerDeps) -> Self {
        Self::new(
            deps,
            ns::USER_POSTED_ON_SUBSCRIBED_CHANNEL,
            "userposted-onsubscribedchannel",
            NotificationKind::PostOnSubscribedChannel,
            Recipients::Named,
            Payload::Post,
        )
    }

    fn event(&self, iq: &Iq) -> Result<PostEvent> {
        let query = iq
            .query
            .as_ref()
            .context("IQ does not contain query element.")?;
        let event = match self.payload {
            Payload::Follow => query.parse::<FollowEvent>().map(|f| PostEvent {
                user_jid: f.user_jid,
                channel: f.channel,
                post_content: String::new(),
                recipient_jid: None,
            }),
            Payload::Post => query.parse::<PostEvent>(),
        }
        .map_err(|_| Error::bad_request("You must provide the userJid and the channel."))?;

        if event.user_jid.is_empty() || event.channel.is_empty() {
            return Err(Error::bad_request(
                "You must provide the userJid and the channel.",
            ));
        }
        Ok(event)
    }

    async fn recipients(&self, event: &PostEvent) -> Result<Vec<String>> {
        let author = bare_jid(&event.user_jid);
        let mut jids: Vec<String> = match self.recipients {
            Recipients::Requester => return Ok(vec![author.to_string()]),
            Recipients::Named => vec![
                event
                    .recipient_jid
                    .clone()
                    .filter(|jid| !jid.is_empty())
                    .context("You must provide the recipientJid.")?,
            ],
            Recipients::Owners => self
                .pubsub
                .owners(&posts_node(&event.channel))
                .await?
                .into_iter()
                .map(|a| a.jid)
                .collect(),
            Recipients::OwnersAndModerators => self
                .pubsub
                .owners_and_moderators(&posts_node(&event.channel))
                .await?
                .into_iter()
                .map(|a| a.jid)
                .collect(),
        };

        jids.retain(|jid| bare_jid(jid) != author);
        jids.sort_unstable();
        jids.dedup();
        Ok(jids)
    }

    async fn run(&self, iq: &Iq) -> Result<String> {
        let event = self.event(iq)?;
        let recipients = self.recipients(&event).await?;

        let mut notified = 0usize;
        for recipient in &recipients {
            let jid = bare_jid(recipient);
            let settings = self.store.get(jid).await.map_err(Error::store)?;
            let Some(settings) = settings else {
                debug!(jid, namespace = self.namespace, "recipient not registered");
                continue;
            };
            let Some(email) = settings.email() else {
                debug!(jid, "recipient has no email");
                continue;
            };
            if !settings.enabled(self.kind) {
                debug!(jid, kind = ?self.kind, "notification disabled by recipient");
                continue;
            }

            self.sender.push(Notification {
                template: self.template.to_string(),
                to: email.to_string(),
                tokens: tokens(&event, jid, email),
            });
            notified += 1;
        }

        info!(
            namespace = self.namespace,
            user = %event.user_jid,
            channel = %event.channel,
            recipients = recipients.len(),
            notified,
            "queued notifications"
        );
        Ok(format!(
            "User [{}] on channel [{}]: notified {notified} of {} recipient(s).",
            event.user_jid,
            event.channel,
            recipients.len()
        ))
    }
}

fn tokens(event: &PostEvent, recipient: &str, email: &str) -> BTreeMap<String, String> {
    [
        ("FIRST_PART_JID", local_part(&event.user_jid)),
        ("FIRST_PART_OWNER_JID", local_part(recipient)),
        ("CHANNEL_JID", event.channel.as_str()),
        ("CONTENT", event.post_content.as_str()),
        ("EMAIL", email),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[async_trait]
impl QueryHandler for NotifyHandler {
    fn namespace(&self) -> &str {
        self.namespace
    }

    async fn handle(&self, iq: &Iq) -> HandlerResult {
        info_reply(self.namespace, self.run(iq).await?)
    }
}

/// Drops a user's settings when their account goes away.
pub struct DeleteUser {
    store: Arc<dyn SettingsStore>,
}

impl DeleteUser {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    async fn run(&self, query: Option<&Query>) -> Result<String> {
        let event: DeleteUserEvent = query
            .context("IQ does not contain query element.")?
            .parse()
            .map_err(|_| Error::bad_request("You must provide the userJid."))?;
        let jid = bare_jid(&event.user_jid);
        let removed = self.store.delete(jid).await.map_err(Error::store)?;
        info!(jid, removed, "deleted user");
        Ok(format!("User [{jid}] deleted."))
    }
}

#[async_trait]
impl QueryHandler for DeleteUser {
    fn namespace(&self) -> &str {
        ns::DELETE_USER
    }

    async fn handle(&self, iq: &Iq) -> HandlerResult {
        info_reply(ns::DELETE_USER, self.run(iq.query.as_ref()).await?)
    }
}
