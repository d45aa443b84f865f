//! The capability every query handler provides.

use {
    async_trait::async_trait,
    pusher_protocol::{Iq, Query, StanzaError},
    serde_json::json,
};

/// Payload for a `result` reply, or the error to reply with.
pub type HandlerResult = Result<Option<Query>, StanzaError>;

/// Handles requests for one namespace.
///
/// Handlers run on their own task and may issue nested gateway calls; they
/// must not block beyond the deadlines of those calls.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// The query namespace this handler answers.
    fn namespace(&self) -> &str;

    async fn handle(&self, iq: &Iq) -> HandlerResult;
}

/// Plain informational reply: `{"info": message}` in the handler's namespace.
pub fn info_reply(namespace: &str, message: impl Into<String>) -> HandlerResult {
    Ok(Some(Query::new(
        namespace,
        json!({ "info": message.into() }),
    )))
}
