use std::time::Duration;

use pusher_protocol::StanzaError;

use crate::{registry::TrafficClass, transport::TransportError};

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the correlation, dispatch and paging machinery.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An inbound request carried no query, or a namespace nobody handles.
    #[error("no {class} handler for namespace {}", namespace.as_deref().unwrap_or("<none>"))]
    Routing {
        class: TrafficClass,
        namespace: Option<String>,
    },

    /// No reply arrived before the deadline.
    #[error("no reply to {id} within {timeout:?}")]
    TimedOut { id: String, timeout: Duration },

    /// The pending slot was dropped before a reply was delivered.
    #[error("exchange {id} was cancelled before a reply arrived")]
    Cancelled { id: String },

    /// The request could not be written to the connection.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The peer answered with an error reply.
    #[error("remote error: {0}")]
    Remote(StanzaError),

    /// The peer answered, but not with what was asked for.
    #[error("malformed reply: {message}")]
    MalformedReply { message: String },

    /// A page request failed; everything fetched so far was discarded.
    #[error("pagination aborted after {pages} page(s): {source}")]
    PaginationAborted {
        pages: usize,
        #[source]
        source: Box<Error>,
    },

    /// A freshly generated correlation id was already pending.
    #[error("correlation id {id} is already pending")]
    DuplicateIdentifier { id: String },

    /// Two handlers claimed the same namespace in one table.
    #[error("namespace {namespace} registered twice for {class} traffic")]
    DuplicateHandler {
        class: TrafficClass,
        namespace: String,
    },
}

impl Error {
    #[must_use]
    pub fn malformed(message: impl std::fmt::Display) -> Self {
        Self::MalformedReply {
            message: message.to_string(),
        }
    }

    /// True for failures where the peer never answered.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::TimedOut { .. } => true,
            Self::PaginationAborted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::malformed(e)
    }
}
