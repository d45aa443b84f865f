//! Payloads of loopback requests: domain events the component raises for
//! itself after consuming pubsub notifications.

use serde::{Deserialize, Serialize};

/// Someone asked to follow, followed, or unfollowed a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEvent {
    /// The follower.
    pub user_jid: String,
    pub channel: String,
}

/// Someone published a post that concerns another user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostEvent {
    /// The author of the post.
    pub user_jid: String,
    pub channel: String,
    #[serde(default)]
    pub post_content: String,
    /// The user to notify, when the event names one. Channel-wide events
    /// leave it empty and the handler resolves recipients itself.
    #[serde(
        default,
        alias = "channelOwnerJid",
        alias = "mentionedJid",
        skip_serializing_if = "Option::is_none"
    )]
    pub recipient_jid: Option<String>,
}

/// A user account is going away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUserEvent {
    pub user_jid: String,
}
