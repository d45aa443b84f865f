//! Pubsub component core.
//!
//! This crate provides:
//! - Correlation of outbound requests with their replies (`correlation`)
//! - Blocking request/reply calls over the shared connection (`gateway`)
//! - Per-traffic-class handler tables and inbound routing (`registry`, `dispatcher`)
//! - Continuation-cursor paging and the pubsub queries built on it (`pagination`, `pubsub`)
//! - Event message consumption into loopback requests (`consumer`)
//! - Stanza transports (`transport`) and the read loop that ties it together (`component`)

pub mod component;
pub mod consumer;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod pagination;
pub mod pubsub;
pub mod registry;
pub mod transport;

pub use {
    component::{ComponentBuilder, ComponentSettings, PusherComponent},
    consumer::EventConsumer,
    correlation::CorrelationTable,
    dispatcher::Dispatcher,
    error::{Error, Result},
    gateway::IqGateway,
    handler::{HandlerResult, QueryHandler, info_reply},
    pagination::{Page, collect_pages},
    pubsub::PubsubClient,
    registry::{HandlerRegistry, HandlerTables, HandlerTablesBuilder, TrafficClass},
    transport::{ChannelSink, StanzaSink, StanzaStream, TcpSink, TransportError, connect_tcp},
};
