//! Pubsub payloads: affiliation listing with result set paging, item
//! retrieval, and event notifications.

use serde::{Deserialize, Serialize};

pub mod roles {
    pub const OWNER: &str = "owner";
    pub const MODERATOR: &str = "moderator";
    pub const PUBLISHER: &str = "publisher";
    pub const MEMBER: &str = "member";
}

/// Result set management block. `last` in a reply is the continuation
/// cursor; it comes back verbatim as `after` in the next request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsmSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl RsmSet {
    pub fn after(cursor: impl Into<String>) -> Self {
        Self {
            after: Some(cursor.into()),
            ..Default::default()
        }
    }

    pub fn last(cursor: impl Into<String>) -> Self {
        Self {
            last: Some(cursor.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliation {
    pub jid: String,
    pub affiliation: String,
}

impl Affiliation {
    pub fn new(jid: impl Into<String>, affiliation: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            affiliation: affiliation.into(),
        }
    }
}

/// `pubsub#owner` affiliations request for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliationsQuery {
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<RsmSet>,
}

/// One page of affiliations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliationsPage {
    #[serde(default)]
    pub affiliations: Vec<Affiliation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<RsmSet>,
}

impl AffiliationsPage {
    pub fn cursor(&self) -> Option<&str> {
        self.set.as_ref().and_then(|s| s.last.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsQuery {
    pub node: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsPage {
    #[serde(default)]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    None,
    Pending,
    Subscribed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventKind {
    Items {
        items: Vec<Item>,
    },
    Subscription {
        jid: String,
        subscription: SubscriptionState,
    },
}

/// Event notification carried inside a `message` stanza.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubsubEvent {
    pub node: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Posts node of a channel.
pub fn posts_node(channel: &str) -> String {
    format!("/user/{channel}/posts")
}

/// Channel address embedded in a node id (`/user/<channel>/posts`).
pub fn channel_of(node: &str) -> Option<&str> {
    node.split('/').nth(2).filter(|s| !s.is_empty())
}
