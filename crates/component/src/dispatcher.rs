//! Inbound routing: replies to the correlation table, requests to handlers.

use std::sync::Arc;

use {
    pusher_protocol::{Iq, StanzaError},
    tracing::{debug, warn},
};

use crate::{
    correlation::CorrelationTable,
    error::{Error, Result},
    handler::QueryHandler,
    registry::{HandlerTables, TrafficClass},
};

#[derive(Clone)]
pub struct Dispatcher {
    tables: Arc<HandlerTables>,
    correlation: Arc<CorrelationTable>,
}

impl Dispatcher {
    pub fn new(tables: Arc<HandlerTables>, correlation: Arc<CorrelationTable>) -> Self {
        Self {
            tables,
            correlation,
        }
    }

    pub fn tables(&self) -> &HandlerTables {
        &self.tables
    }

    /// Route one externally received iq.
    ///
    /// Replies are delivered to their waiter and yield `None`. Requests
    /// always yield the reply to send back.
    pub async fn dispatch(&self, iq: Iq) -> Option<Iq> {
        match TrafficClass::of(iq.iq_type) {
            Some(class) => Some(self.handle_request(class, &iq).await),
            None => {
                self.route_reply(iq);
                None
            },
        }
    }

    /// Hand a `result` or `error` iq to whoever is waiting on its id.
    ///
    /// Returns whether a waiter claimed it. Unclaimed error replies are
    /// logged rather than dropped silently.
    pub fn route_reply(&self, iq: Iq) -> bool {
        let id = iq.id.clone();
        let error = iq.error.clone();
        let claimed = self.correlation.deliver(&id, iq);
        if !claimed {
            match error {
                Some(error) => {
                    warn!(id = %id, condition = %error.condition, error = %error, "unclaimed error reply")
                },
                None => debug!(id = %id, "unclaimed reply discarded"),
            }
        }
        claimed
    }

    /// Run the handler for `iq` in `class` and build the reply.
    ///
    /// Never fails: routing failures and handler errors both become error
    /// replies addressed to the originator.
    pub async fn handle_request(&self, class: TrafficClass, iq: &Iq) -> Iq {
        let handler = match self.resolve(class, iq) {
            Ok(handler) => handler,
            Err(e) => {
                warn!(class = %class, id = %iq.id, from = ?iq.from, error = %e, "unroutable request");
                return iq.error_reply(routing_error(iq));
            },
        };

        debug!(class = %class, id = %iq.id, namespace = handler.namespace(), "dispatching request");
        match handler.handle(iq).await {
            Ok(payload) => iq.result(payload),
            Err(error) => {
                debug!(
                    class = %class,
                    id = %iq.id,
                    namespace = handler.namespace(),
                    condition = %error.condition,
                    "handler returned error"
                );
                iq.error_reply(error)
            },
        }
    }

    /// Look up the handler for the iq's namespace in the class's table.
    pub fn resolve(&self, class: TrafficClass, iq: &Iq) -> Result<&Arc<dyn QueryHandler>> {
        let namespace = iq.namespace();
        namespace
            .and_then(|ns| self.tables.table(class).lookup(ns))
            .ok_or_else(|| Error::Routing {
                class,
                namespace: namespace.map(str::to_string),
            })
    }
}

fn routing_error(iq: &Iq) -> StanzaError {
    match iq.namespace() {
        None => StanzaError::bad_request("IQ does not contain query element."),
        Some(ns) => StanzaError::not_implemented(format!("no handler for namespace {ns}")),
    }
}
