//! Turns pubsub event messages into loopback requests.
//!
//! Each notification can fan out into several requests: a published item
//! produces one for the channel owners, one per mentioned user, one for the
//! author of the post it replies to, and one per other affiliated user.
//! Subscription changes raise follow events; the consumer remembers pending
//! follow requests so that their approval or denial can be told apart from
//! a plain follow or unfollow.
//! Lookups needed along the way go through the gateway, so this runs off
//! the read loop.

use std::sync::atomic::{AtomicU64, Ordering};

use {
    dashmap::DashSet,
    pusher_protocol::{
        Iq, Message, Query,
        events::{FollowEvent, PostEvent},
        ns,
        pubsub::{Affiliation, EventKind, Item, SubscriptionState, channel_of, roles},
    },
    tracing::{debug, warn},
};

use crate::{error::Result, pubsub::PubsubClient};

pub struct EventConsumer {
    pubsub: PubsubClient,
    /// Address loopback requests are sent "to".
    component_jid: String,
    next_id: AtomicU64,
    /// `(node, jid)` of follow requests awaiting a decision.
    pending: DashSet<(String, String)>,
}

impl EventConsumer {
    pub fn new(pubsub: PubsubClient, component_jid: impl Into<String>) -> Self {
        Self {
            pubsub,
            component_jid: component_jid.into(),
            next_id: AtomicU64::new(1),
            pending: DashSet::new(),
        }
    }

    /// Loopback requests raised by one inbound message.
    ///
    /// Messages without a pubsub event, or for nodes that are not channel
    /// nodes, raise nothing. Failed lookups drop only the requests that
    /// depended on them.
    pub async fn requests(&self, message: &Message) -> Vec<Iq> {
        let Some(event) = &message.event else {
            return Vec::new();
        };
        let Some(channel) = channel_of(&event.node) else {
            debug!(node = %event.node, "event for non-channel node ignored");
            return Vec::new();
        };

        let mut requests = Vec::new();
        match &event.kind {
            EventKind::Subscription { jid, subscription } => {
                let payload = FollowEvent {
                    user_jid: jid.clone(),
                    channel: channel.to_string(),
                };
                for namespace in self.follow_transition(&event.node, jid, *subscription) {
                    self.push(&mut requests, namespace, &payload);
                }
            },
            EventKind::Items { items } => {
                if items.is_empty() {
                    return requests;
                }
                let affiliations = match self.pubsub.fetch_all(&event.node).await {
                    Ok(affiliations) => Some(affiliations),
                    Err(e) => {
                        warn!(node = %event.node, error = %e, "could not fetch channel affiliations");
                        None
                    },
                };
                for item in items {
                    self.item_requests(
                        &event.node,
                        channel,
                        item,
                        affiliations.as_deref(),
                        &mut requests,
                    )
                    .await;
                }
            },
        }
        requests
    }

    /// Namespaces raised by a subscription change. An approved request also
    /// counts as a follow; a denied one is not an unfollow.
    fn follow_transition(
        &self,
        node: &str,
        jid: &str,
        state: SubscriptionState,
    ) -> Vec<&'static str> {
        let key = (node.to_string(), jid.to_string());
        match state {
            SubscriptionState::Pending => {
                self.pending.insert(key);
                vec![ns::FOLLOW_REQUEST]
            },
            SubscriptionState::Subscribed if self.pending.remove(&key).is_some() => {
                vec![ns::FOLLOW_REQUEST_APPROVED, ns::USER_FOLLOWED]
            },
            SubscriptionState::Subscribed => vec![ns::USER_FOLLOWED],
            SubscriptionState::None if self.pending.remove(&key).is_some() => {
                vec![ns::FOLLOW_REQUEST_DENIED]
            },
            SubscriptionState::None => vec![ns::USER_UNFOLLOWED],
        }
    }

    /// `affiliations` is `None` when the lookup failed, which only drops the
    /// subscribed-channel requests.
    async fn item_requests(
        &self,
        node: &str,
        channel: &str,
        item: &Item,
        affiliations: Option<&[Affiliation]>,
        out: &mut Vec<Iq>,
    ) {
        let post = |recipient: Option<String>| PostEvent {
            user_jid: item.author.clone(),
            channel: channel.to_string(),
            post_content: item.content.clone(),
            recipient_jid: recipient,
        };

        self.push(out, ns::USER_POSTED_ON_MY_CHANNEL, &post(None));

        for mentioned in mentions(&item.content) {
            if mentioned != item.author {
                self.push(out, ns::USER_POSTED_MENTION, &post(Some(mentioned)));
            }
        }

        if let Some(parent_id) = &item.in_reply_to {
            match self.pubsub.single_item(node, parent_id).await {
                Ok(Some(parent)) if parent.author != item.author => {
                    self.push(out, ns::USER_POSTED_AFTER_MY_POST, &post(Some(parent.author)));
                },
                Ok(_) => {},
                Err(e) => {
                    warn!(node, item = %parent_id, error = %e, "could not fetch replied-to post")
                },
            }
        }

        for a in affiliations.unwrap_or_default() {
            if a.affiliation != roles::OWNER && a.jid != item.author {
                self.push(
                    out,
                    ns::USER_POSTED_ON_SUBSCRIBED_CHANNEL,
                    &post(Some(a.jid.clone())),
                );
            }
        }
    }

    fn push<T: serde::Serialize>(&self, out: &mut Vec<Iq>, namespace: &str, payload: &T) {
        match self.loopback(namespace, payload) {
            Ok(iq) => out.push(iq),
            Err(e) => warn!(namespace, error = %e, "could not build loopback request"),
        }
    }

    fn loopback<T: serde::Serialize>(&self, namespace: &str, payload: &T) -> Result<Iq> {
        let mut iq = Iq::set(&self.component_jid, Query::from_payload(namespace, payload)?);
        iq.id = format!("loopback-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        iq.from = Some(self.component_jid.clone());
        Ok(iq)
    }
}

/// Jids mentioned as `@user@domain` in post content, in order, deduplicated.
pub fn mentions(content: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for word in content.split_whitespace() {
        let Some(rest) = word.strip_prefix('@') else {
            continue;
        };
        let jid = rest.trim_end_matches(|c: char| !c.is_alphanumeric());
        let Some((local, domain)) = jid.split_once('@') else {
            continue;
        };
        if local.is_empty() || domain.is_empty() || found.iter().any(|f| f == jid) {
            continue;
        }
        found.push(jid.to_string());
    }
    found
}
