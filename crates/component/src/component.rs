//! The pusher component: one instance owns the correlation table, the
//! gateway, the handler tables and the event consumer, and runs the single
//! inbound-reading loop.

use std::{sync::Arc, time::Duration};

use {
    futures::StreamExt,
    pusher_protocol::{Iq, IqType, Message, Stanza},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    consumer::EventConsumer,
    correlation::CorrelationTable,
    dispatcher::Dispatcher,
    gateway::IqGateway,
    pubsub::PubsubClient,
    registry::{HandlerTables, TrafficClass},
    transport::{StanzaSink, StanzaStream},
};

/// Values the component is constructed with; never reloaded.
#[derive(Debug, Clone)]
pub struct ComponentSettings {
    /// Address of this component.
    pub jid: String,
    /// Peer answering pubsub queries.
    pub channel_server: String,
    /// Deadline for every outbound request.
    pub reply_timeout: Duration,
}

/// First construction phase. Handlers need the pubsub client before the
/// handler tables exist, so the client is available here.
pub struct ComponentBuilder {
    settings: ComponentSettings,
    sink: Arc<dyn StanzaSink>,
    correlation: Arc<CorrelationTable>,
    gateway: Arc<IqGateway>,
    pubsub: PubsubClient,
}

impl ComponentBuilder {
    pub fn pubsub(&self) -> PubsubClient {
        self.pubsub.clone()
    }

    pub fn gateway(&self) -> Arc<IqGateway> {
        Arc::clone(&self.gateway)
    }

    pub fn finish(self, tables: HandlerTables) -> PusherComponent {
        for class in TrafficClass::ALL {
            info!(class = %class, namespaces = ?tables.table(class).namespaces(), "handler table");
        }
        let consumer = EventConsumer::new(self.pubsub.clone(), self.settings.jid.clone());
        PusherComponent {
            dispatcher: Dispatcher::new(Arc::new(tables), self.correlation),
            consumer: Arc::new(consumer),
            settings: self.settings,
            sink: self.sink,
            gateway: self.gateway,
            pubsub: self.pubsub,
        }
    }
}

#[derive(Clone)]
pub struct PusherComponent {
    settings: ComponentSettings,
    sink: Arc<dyn StanzaSink>,
    gateway: Arc<IqGateway>,
    pubsub: PubsubClient,
    dispatcher: Dispatcher,
    consumer: Arc<EventConsumer>,
}

impl PusherComponent {
    pub fn builder(settings: ComponentSettings, sink: Arc<dyn StanzaSink>) -> ComponentBuilder {
        let correlation = Arc::new(CorrelationTable::new());
        let gateway = Arc::new(
            IqGateway::new(Arc::clone(&correlation), Arc::clone(&sink), settings.reply_timeout)
                .with_sender_address(settings.jid.clone()),
        );
        let pubsub = PubsubClient::new(Arc::clone(&gateway), settings.channel_server.clone());
        ComponentBuilder {
            settings,
            sink,
            correlation,
            gateway,
            pubsub,
        }
    }

    pub fn settings(&self) -> &ComponentSettings {
        &self.settings
    }

    pub fn gateway(&self) -> &Arc<IqGateway> {
        &self.gateway
    }

    pub fn pubsub(&self) -> &PubsubClient {
        &self.pubsub
    }

    /// Drain `inbound` until it ends or `cancel` fires.
    ///
    /// Replies are routed inline. Requests and event messages each get their
    /// own task, so handlers may block on nested calls whose replies this
    /// loop keeps delivering.
    pub async fn run(&self, mut inbound: StanzaStream, cancel: CancellationToken) {
        info!(jid = %self.settings.jid, "component running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("component shutting down");
                    break;
                }
                next = inbound.next() => match next {
                    Some(stanza) => self.accept(stanza),
                    None => {
                        info!("inbound stream ended");
                        break;
                    },
                },
            }
        }
    }

    fn accept(&self, stanza: Stanza) {
        match stanza {
            Stanza::Iq(iq) if !iq.iq_type.is_request() => {
                self.dispatcher.route_reply(iq);
            },
            Stanza::Iq(iq) => {
                let this = self.clone();
                tokio::spawn(async move { this.answer(iq).await });
            },
            Stanza::Message(message) => {
                let this = self.clone();
                tokio::spawn(async move { this.consume(message).await });
            },
            Stanza::Handshake(handshake) => {
                debug!(component = %handshake.component, "ignoring inbound handshake");
            },
        }
    }

    async fn answer(&self, iq: Iq) {
        let Some(reply) = self.dispatcher.dispatch(iq).await else {
            return;
        };
        let id = reply.id.clone();
        if let Err(e) = self.sink.send(Stanza::Iq(reply)).await {
            warn!(id = %id, error = %e, "failed to send reply");
        }
    }

    async fn consume(&self, message: Message) {
        let requests = self.consumer.requests(&message).await;
        debug!(from = ?message.from, requests = requests.len(), "consumed event message");
        for request in requests {
            self.handle_loopback(request).await;
        }
    }

    /// Run `iq` through the loopback table and return the handler's reply.
    pub async fn handle_loopback(&self, iq: Iq) -> Iq {
        let reply = self
            .dispatcher
            .handle_request(TrafficClass::Loopback, &iq)
            .await;
        if reply.iq_type == IqType::Error {
            warn!(
                id = %iq.id,
                namespace = ?iq.namespace(),
                error = ?reply.error,
                "loopback request failed"
            );
        }
        reply
    }
}
