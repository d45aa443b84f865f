//! Synchronous request gateway: send an iq and wait for its reply.
//!
//! Waiting suspends only the calling task. Replies are delivered by the
//! read loop through the correlation table, so a handler running on its own
//! task may call out (and nest calls) without stalling inbound traffic.

use std::{sync::Arc, time::Duration};

use {
    pusher_protocol::{ErrorType, Iq, IqType, Query, Stanza, StanzaError, conditions},
    rand::{Rng, distr::Alphanumeric},
    tokio::sync::oneshot,
    tracing::{debug, warn},
};

use crate::{
    correlation::CorrelationTable,
    error::{Error, Result},
    transport::StanzaSink,
};

/// Length of generated correlation ids.
const ID_LEN: usize = 6;
/// Attempts at finding an id that is not already pending.
const MAX_ID_ATTEMPTS: usize = 8;

type IdGenerator = Box<dyn Fn() -> String + Send + Sync>;

fn random_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

/// Removes the pending slot when the call finishes, however it finishes
/// (reply, timeout, send failure, or the calling future being dropped).
struct PendingGuard<'a> {
    table: &'a CorrelationTable,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.expire(&self.id);
    }
}

pub struct IqGateway {
    table: Arc<CorrelationTable>,
    sink: Arc<dyn StanzaSink>,
    /// Stamped as `from` on outbound requests that lack one.
    sender_address: Option<String>,
    default_timeout: Duration,
    next_id: IdGenerator,
}

impl IqGateway {
    pub fn new(
        table: Arc<CorrelationTable>,
        sink: Arc<dyn StanzaSink>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            table,
            sink,
            sender_address: None,
            default_timeout,
            next_id: Box::new(random_id),
        }
    }

    #[must_use]
    pub fn with_sender_address(mut self, address: impl Into<String>) -> Self {
        self.sender_address = Some(address.into());
        self
    }

    /// Replace the id generator (tests use this to force collisions).
    #[must_use]
    pub fn with_id_generator(
        mut self,
        generator: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.next_id = Box::new(generator);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn correlation(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    /// Send `request` and wait up to the configured deadline for its reply.
    pub async fn call(&self, request: Iq) -> Result<Iq> {
        self.call_with_timeout(request, self.default_timeout).await
    }

    /// Send `request` and wait up to `timeout` for its reply.
    ///
    /// Returns the reply whether it is a `result` or an `error`; use
    /// [`IqGateway::query`] to turn error replies into [`Error::Remote`].
    pub async fn call_with_timeout(&self, mut request: Iq, timeout: Duration) -> Result<Iq> {
        let (id, rx) = self.allocate()?;
        let _guard = PendingGuard {
            table: &self.table,
            id: id.clone(),
        };

        request.id = id.clone();
        if request.from.is_none() {
            request.from = self.sender_address.clone();
        }

        debug!(id = %id, namespace = ?request.namespace(), to = ?request.to, "sending request");
        if let Err(e) = self.sink.send(Stanza::Iq(request)).await {
            warn!(id = %id, error = %e, "failed to send request");
            return Err(Error::Transport(e));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => {
                debug!(id = %id, reply_type = ?reply.iq_type, "received reply");
                Ok(reply)
            },
            Ok(Err(_)) => Err(Error::Cancelled { id }),
            Err(_) => {
                warn!(id = %id, timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(Error::TimedOut { id, timeout })
            },
        }
    }

    /// Like [`IqGateway::call`], but an `error` reply becomes [`Error::Remote`]
    /// and only the reply payload is returned.
    pub async fn query(&self, request: Iq) -> Result<Option<Query>> {
        let reply = self.call(request).await?;
        match reply.iq_type {
            IqType::Result => Ok(reply.query),
            IqType::Error => Err(Error::Remote(reply.error.unwrap_or_else(|| {
                StanzaError::new(
                    ErrorType::Cancel,
                    conditions::INTERNAL_SERVER_ERROR,
                    "error reply without error payload",
                )
            }))),
            other => Err(Error::malformed(format!("reply has request type {other:?}"))),
        }
    }

    /// Generate an id that is not currently pending and register it.
    fn allocate(&self) -> Result<(String, oneshot::Receiver<Iq>)> {
        let mut last = None;
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = (self.next_id)();
            match self.table.register(&id) {
                Ok(rx) => return Ok((id, rx)),
                Err(e @ Error::DuplicateIdentifier { .. }) => {
                    debug!(id = %id, "correlation id collision, regenerating");
                    last = Some(e);
                },
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| Error::DuplicateIdentifier { id: String::new() }))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::transport::{self, ChannelSink},
        pusher_protocol::ns,
        serde_json::json,
        std::sync::atomic::{AtomicUsize, Ordering},
        tokio::sync::mpsc,
    };

    fn gateway(timeout: Duration) -> (Arc<IqGateway>, mpsc::UnboundedReceiver<Stanza>) {
        let (sink, rx) = transport::channel();
        let gw = IqGateway::new(Arc::new(CorrelationTable::new()), Arc::new(sink), timeout)
            .with_sender_address("pusher.example.com");
        (Arc::new(gw), rx)
    }

    fn request() -> Iq {
        Iq::get("channels.example.com", Query::new(ns::PUBSUB, json!({})))
    }

    /// Answer every outbound request with `answer(request)`.
    fn spawn_peer(
        gw: Arc<IqGateway>,
        mut rx: mpsc::UnboundedReceiver<Stanza>,
        answer: impl Fn(&Iq) -> Iq + Send + 'static,
    ) {
        tokio::spawn(async move {
            while let Some(Stanza::Iq(iq)) = rx.recv().await {
                gw.correlation().deliver(&iq.id, answer(&iq));
            }
        });
    }

    #[tokio::test]
    async fn call_returns_matching_reply() {
        let (gw, rx) = gateway(Duration::from_secs(5));
        spawn_peer(Arc::clone(&gw), rx, |iq| {
            iq.result(Some(Query::new(ns::PUBSUB, json!({ "echo": iq.id }))))
        });

        let reply = gw.call(request()).await.unwrap();
        assert_eq!(reply.iq_type, IqType::Result);
        assert_eq!(reply.query.unwrap().body["echo"], reply.id);
        assert!(gw.correlation().is_empty());
    }

    #[tokio::test]
    async fn stamps_id_and_sender() {
        let (gw, mut rx) = gateway(Duration::from_millis(20));
        let _ = gw.call(request()).await;

        let Some(Stanza::Iq(sent)) = rx.recv().await else {
            panic!("expected iq");
        };
        assert_eq!(sent.id.len(), ID_LEN);
        assert_eq!(sent.from.as_deref(), Some("pusher.example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_no_pending_entry() {
        let (gw, _rx) = gateway(Duration::from_secs(5));
        assert!(gw.correlation().is_empty());

        let err = gw.call(request()).await.unwrap_err();
        assert!(matches!(err, Error::TimedOut { .. }));
        assert!(err.is_timeout());
        assert!(gw.correlation().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_after_timeout_is_discarded() {
        let (gw, mut rx) = gateway(Duration::from_secs(1));
        let err = gw.call(request()).await.unwrap_err();
        assert!(matches!(err, Error::TimedOut { .. }));

        let Some(Stanza::Iq(sent)) = rx.recv().await else {
            panic!("expected iq");
        };
        assert!(!gw.correlation().deliver(&sent.id, sent.result(None)));
        assert!(gw.correlation().is_empty());
    }

    #[tokio::test]
    async fn send_failure_surfaces_without_waiting() {
        let (sink, rx): (ChannelSink, _) = transport::channel();
        drop(rx);
        let gw = IqGateway::new(
            Arc::new(CorrelationTable::new()),
            Arc::new(sink),
            Duration::from_secs(3600),
        );

        let err = gw.call(request()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(gw.correlation().is_empty());
    }

    #[tokio::test]
    async fn error_reply_is_distinct_from_timeout() {
        let (gw, rx) = gateway(Duration::from_secs(5));
        spawn_peer(Arc::clone(&gw), rx, |iq| {
            iq.error_reply(StanzaError::item_not_found("no such node"))
        });

        let reply = gw.call(request()).await.unwrap();
        assert_eq!(reply.iq_type, IqType::Error);

        let err = gw.query(request()).await.unwrap_err();
        let Error::Remote(remote) = err else {
            panic!("expected remote error, got {err:?}");
        };
        assert_eq!(remote.condition, conditions::ITEM_NOT_FOUND);
    }

    #[tokio::test]
    async fn regenerates_colliding_ids() {
        let (sink, _rx) = transport::channel();
        let table = Arc::new(CorrelationTable::new());
        let _held = table.register("AAAAAA").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let gw = IqGateway::new(Arc::clone(&table), Arc::new(sink), Duration::from_millis(10))
            .with_id_generator(move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    "AAAAAA".into()
                } else {
                    "BBBBBB".into()
                }
            });

        let (id, _rx) = gw.allocate().unwrap();
        assert_eq!(id, "BBBBBB");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_id_attempts_fail_the_call_only() {
        let (sink, _rx) = transport::channel();
        let table = Arc::new(CorrelationTable::new());
        let _held = table.register("stuck").unwrap();
        let gw = IqGateway::new(Arc::clone(&table), Arc::new(sink), Duration::from_millis(10))
            .with_id_generator(|| "stuck".into());

        let err = gw.call(request()).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateIdentifier { .. }));
        // The pre-existing exchange is untouched.
        assert!(table.is_pending("stuck"));
    }

    #[tokio::test]
    async fn dropped_call_releases_slot() {
        let (gw, _rx) = gateway(Duration::from_secs(3600));
        let call = {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move { gw.call(request()).await })
        };
        while gw.correlation().is_empty() {
            tokio::task::yield_now().await;
        }
        call.abort();
        let _ = call.await;
        assert!(gw.correlation().is_empty());
    }
}
