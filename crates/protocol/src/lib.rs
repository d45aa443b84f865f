//! Stanza wire model spoken between the pusher component and its server.
//!
//! Every frame is one line of JSON. Frame kinds:
//! - `iq`       : request (`get`/`set`) or reply (`result`/`error`), matched by `id`
//! - `message`  : one-way stanza; carries pubsub event notifications
//! - `handshake`: first frame on a new connection, authenticates the component

use serde::{Deserialize, Serialize};

pub mod events;
pub mod pubsub;

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_FRAME_BYTES: usize = 262_144; // 256 KB
pub const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 5;

// ── Namespaces ───────────────────────────────────────────────────────────────

pub mod ns {
    pub const PUBSUB: &str = "http://jabber.org/protocol/pubsub";
    pub const PUBSUB_OWNER: &str = "http://jabber.org/protocol/pubsub#owner";
    pub const PUBSUB_EVENT: &str = "http://jabber.org/protocol/pubsub#event";
    pub const RSM: &str = "http://jabber.org/protocol/rsm";

    pub const NOTIFICATION_SETTINGS: &str = "http://buddycloud.com/pusher/notification-settings";
    pub const METADATA: &str = "http://buddycloud.com/pusher/metadata";
    pub const SIGNUP: &str = "http://buddycloud.com/pusher/signup";
    pub const UNREGISTER: &str = "http://buddycloud.com/pusher/unregister";
    pub const PASSWORD_RESET: &str = "http://buddycloud.com/pusher/password-reset";

    /// In-band registration on the user's server; used to set a new password.
    pub const REGISTER: &str = "jabber:iq:register";

    pub const FOLLOW_REQUEST: &str = "http://buddycloud.com/pusher/follow-request";
    pub const FOLLOW_REQUEST_APPROVED: &str =
        "http://buddycloud.com/pusher/followrequest-approved";
    pub const FOLLOW_REQUEST_DENIED: &str = "http://buddycloud.com/pusher/followrequest-denied";
    pub const USER_FOLLOWED: &str = "http://buddycloud.com/pusher/userfollowed";
    pub const USER_UNFOLLOWED: &str = "http://buddycloud.com/pusher/userunfollowed";
    pub const USER_POSTED_AFTER_MY_POST: &str =
        "http://buddycloud.com/pusher/userposted-aftermypost";
    pub const USER_POSTED_MENTION: &str = "http://buddycloud.com/pusher/userposted-mention";
    pub const USER_POSTED_ON_MY_CHANNEL: &str =
        "http://buddycloud.com/pusher/userposted-onmychannel";
    pub const USER_POSTED_ON_SUBSCRIBED_CHANNEL: &str =
        "http://buddycloud.com/pusher/userposted-onsubscribedchannel";
    pub const DELETE_USER: &str = "http://buddycloud.com/pusher/deleteuser";
}

// ── Error conditions ─────────────────────────────────────────────────────────

pub mod conditions {
    pub const BAD_REQUEST: &str = "bad-request";
    pub const FEATURE_NOT_IMPLEMENTED: &str = "feature-not-implemented";
    pub const ITEM_NOT_FOUND: &str = "item-not-found";
    pub const INTERNAL_SERVER_ERROR: &str = "internal-server-error";
    pub const SERVICE_UNAVAILABLE: &str = "service-unavailable";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Cancel,
    Modify,
    Wait,
    Auth,
}

/// Error payload carried by an `error` iq.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StanzaError {
    #[serde(rename = "type")]
    pub kind: ErrorType,
    pub condition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl StanzaError {
    pub fn new(kind: ErrorType, condition: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            condition: condition.into(),
            text: Some(text.into()),
        }
    }

    pub fn bad_request(text: impl Into<String>) -> Self {
        Self::new(ErrorType::Modify, conditions::BAD_REQUEST, text)
    }

    pub fn not_implemented(text: impl Into<String>) -> Self {
        Self::new(ErrorType::Cancel, conditions::FEATURE_NOT_IMPLEMENTED, text)
    }

    pub fn item_not_found(text: impl Into<String>) -> Self {
        Self::new(ErrorType::Cancel, conditions::ITEM_NOT_FOUND, text)
    }

    pub fn internal(text: impl Into<String>) -> Self {
        Self::new(ErrorType::Wait, conditions::INTERNAL_SERVER_ERROR, text)
    }
}

impl std::fmt::Display for StanzaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{}: {text}", self.condition),
            None => f.write_str(&self.condition),
        }
    }
}

// ── Iq ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IqType {
    Get,
    Set,
    Result,
    Error,
}

impl IqType {
    /// `get` and `set` expect a reply; `result` and `error` are replies.
    pub fn is_request(self) -> bool {
        matches!(self, Self::Get | Self::Set)
    }
}

/// Typed child of an iq. `xmlns` selects the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub xmlns: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub body: serde_json::Value,
}

impl Query {
    pub fn new(xmlns: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            xmlns: xmlns.into(),
            body,
        }
    }

    /// Build a query from any serializable payload.
    pub fn from_payload<T: Serialize>(
        xmlns: impl Into<String>,
        payload: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self::new(xmlns, serde_json::to_value(payload)?))
    }

    /// Decode the body into a typed payload.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.body)
    }

    /// String field of the body, if present and non-empty.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.body
            .get(field)
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iq {
    #[serde(rename = "type")]
    pub iq_type: IqType,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StanzaError>,
}

impl Iq {
    fn request(iq_type: IqType, to: impl Into<String>, query: Query) -> Self {
        Self {
            iq_type,
            id: String::new(),
            from: None,
            to: Some(to.into()),
            query: Some(query),
            error: None,
        }
    }

    /// Outbound `get`. The id is stamped when the request is sent.
    pub fn get(to: impl Into<String>, query: Query) -> Self {
        Self::request(IqType::Get, to, query)
    }

    /// Outbound `set`. The id is stamped when the request is sent.
    pub fn set(to: impl Into<String>, query: Query) -> Self {
        Self::request(IqType::Set, to, query)
    }

    /// Namespace of the query child, the iq's type tag.
    pub fn namespace(&self) -> Option<&str> {
        self.query.as_ref().map(|q| q.xmlns.as_str())
    }

    /// Successful reply to this request.
    pub fn result(&self, payload: Option<Query>) -> Self {
        Self {
            iq_type: IqType::Result,
            id: self.id.clone(),
            from: self.to.clone(),
            to: self.from.clone(),
            query: payload,
            error: None,
        }
    }

    /// Error reply to this request. The original query is echoed back.
    pub fn error_reply(&self, error: StanzaError) -> Self {
        Self {
            iq_type: IqType::Error,
            id: self.id.clone(),
            from: self.to.clone(),
            to: self.from.clone(),
            query: self.query.clone(),
            error: Some(error),
        }
    }
}

// ── Message ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<pubsub::PubsubEvent>,
}

// ── Handshake ────────────────────────────────────────────────────────────────

/// First frame sent by the component after the connection opens.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub protocol: u32,
    pub component: String,
    #[serde(default)]
    pub secret: String,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("protocol", &self.protocol)
            .field("component", &self.component)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Discriminated union of all frame types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Stanza {
    Iq(Iq),
    Message(Message),
    Handshake(Handshake),
}
