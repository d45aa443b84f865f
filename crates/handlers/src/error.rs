use {
    pusher_common::FromMessage,
    pusher_protocol::{ErrorType, StanzaError, conditions},
};

/// Why a handler could not complete a request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request is missing something the handler needs.
    #[error("{0}")]
    BadRequest(String),

    /// The request names something the pusher does not know.
    #[error("{0}")]
    NotFound(String),

    /// A pubsub lookup on the channel server failed.
    #[error("channel server lookup failed: {0}")]
    Lookup(#[from] pusher_component::Error),

    /// The settings store failed.
    #[error("settings store: {0:#}")]
    Store(anyhow::Error),
}

impl Error {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn store(e: anyhow::Error) -> Self {
        Self::Store(e)
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::BadRequest(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pusher_common::impl_context!();

impl From<Error> for StanzaError {
    fn from(e: Error) -> Self {
        match e {
            Error::BadRequest(text) => StanzaError::bad_request(text),
            Error::NotFound(text) => StanzaError::item_not_found(text),
            Error::Lookup(e) if e.is_timeout() => StanzaError::new(
                ErrorType::Wait,
                conditions::SERVICE_UNAVAILABLE,
                e.to_string(),
            ),
            Error::Lookup(e) => StanzaError::internal(e.to_string()),
            e @ Error::Store(_) => StanzaError::internal(e.to_string()),
        }
    }
}
