//! Handler tables, one per traffic class.
//!
//! Tables are filled once through [`HandlerTablesBuilder`] and are read-only
//! afterwards, so lookups need no locking.

use std::{collections::HashMap, fmt, sync::Arc};

use {pusher_protocol::IqType, tracing::debug};

use crate::{
    error::{Error, Result},
    handler::QueryHandler,
};

/// Routing context a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    /// External `get` queries.
    Get,
    /// External `set` queries.
    Set,
    /// Domain events looped back internally.
    Loopback,
}

impl TrafficClass {
    pub const ALL: [TrafficClass; 3] = [Self::Get, Self::Set, Self::Loopback];

    /// Class of an externally received iq; `None` for replies.
    pub fn of(iq_type: IqType) -> Option<Self> {
        match iq_type {
            IqType::Get => Some(Self::Get),
            IqType::Set => Some(Self::Set),
            IqType::Result | IqType::Error => None,
        }
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Loopback => "loopback",
        })
    }
}

/// Namespace → handler map for one traffic class.
pub struct HandlerRegistry {
    class: TrafficClass,
    handlers: HashMap<String, Arc<dyn QueryHandler>>,
}

impl HandlerRegistry {
    fn new(class: TrafficClass) -> Self {
        Self {
            class,
            handlers: HashMap::new(),
        }
    }

    fn insert(&mut self, handler: Arc<dyn QueryHandler>) -> Result<()> {
        let namespace = handler.namespace().to_string();
        if self.handlers.contains_key(&namespace) {
            return Err(Error::DuplicateHandler {
                class: self.class,
                namespace,
            });
        }
        debug!(class = %self.class, namespace = %namespace, "registered handler");
        self.handlers.insert(namespace, handler);
        Ok(())
    }

    pub fn class(&self) -> TrafficClass {
        self.class
    }

    pub fn lookup(&self, namespace: &str) -> Option<&Arc<dyn QueryHandler>> {
        self.handlers.get(namespace)
    }

    /// Registered namespaces, sorted.
    pub fn namespaces(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// The three immutable handler tables.
pub struct HandlerTables {
    get: HandlerRegistry,
    set: HandlerRegistry,
    loopback: HandlerRegistry,
}

impl HandlerTables {
    pub fn builder() -> HandlerTablesBuilder {
        HandlerTablesBuilder {
            tables: Self::empty(),
        }
    }

    pub fn empty() -> Self {
        Self {
            get: HandlerRegistry::new(TrafficClass::Get),
            set: HandlerRegistry::new(TrafficClass::Set),
            loopback: HandlerRegistry::new(TrafficClass::Loopback),
        }
    }

    pub fn table(&self, class: TrafficClass) -> &HandlerRegistry {
        match class {
            TrafficClass::Get => &self.get,
            TrafficClass::Set => &self.set,
            TrafficClass::Loopback => &self.loopback,
        }
    }
}

/// Startup-time population of [`HandlerTables`]. A namespace registered
/// twice in the same class fails immediately.
pub struct HandlerTablesBuilder {
    tables: HandlerTables,
}

impl HandlerTablesBuilder {
    pub fn register(&mut self, class: TrafficClass, handler: Arc<dyn QueryHandler>) -> Result<()> {
        match class {
            TrafficClass::Get => self.tables.get.insert(handler),
            TrafficClass::Set => self.tables.set.insert(handler),
            TrafficClass::Loopback => self.tables.loopback.insert(handler),
        }
    }

    /// Chaining form of [`HandlerTablesBuilder::register`].
    pub fn with(mut self, class: TrafficClass, handler: Arc<dyn QueryHandler>) -> Result<Self> {
        self.register(class, handler)?;
        Ok(self)
    }

    pub fn build(self) -> HandlerTables {
        self.tables
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::handler::{HandlerResult, info_reply},
        async_trait::async_trait,
        pusher_protocol::Iq,
    };

    struct Named(&'static str);

    #[async_trait]
    impl QueryHandler for Named {
        fn namespace(&self) -> &str {
            self.0
        }

        async fn handle(&self, _iq: &Iq) -> HandlerResult {
            info_reply(self.0, "ok")
        }
    }

    #[test]
    fn collision_within_class_fails_fast() {
        let mut builder = HandlerTables::builder();
        builder
            .register(TrafficClass::Get, Arc::new(Named("urn:a")))
            .unwrap();
        let err = builder
            .register(TrafficClass::Get, Arc::new(Named("urn:a")))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicateHandler { class: TrafficClass::Get, ref namespace } if namespace == "urn:a"
        ));
    }

    #[test]
    fn same_namespace_in_different_classes_is_fine() {
        let tables = HandlerTables::builder()
            .with(TrafficClass::Get, Arc::new(Named("urn:a")))
            .unwrap()
            .with(TrafficClass::Set, Arc::new(Named("urn:a")))
            .unwrap()
            .build();

        assert!(tables.table(TrafficClass::Get).lookup("urn:a").is_some());
        assert!(tables.table(TrafficClass::Set).lookup("urn:a").is_some());
        assert!(tables.table(TrafficClass::Loopback).is_empty());
    }

    #[test]
    fn namespaces_sorted() {
        let tables = HandlerTables::builder()
            .with(TrafficClass::Loopback, Arc::new(Named("urn:b")))
            .unwrap()
            .with(TrafficClass::Loopback, Arc::new(Named("urn:a")))
            .unwrap()
            .build();
        assert_eq!(tables.table(TrafficClass::Loopback).namespaces(), vec![
            "urn:a", "urn:b"
        ]);
    }

    #[test]
    fn class_of_iq_type() {
        assert_eq!(TrafficClass::of(IqType::Get), Some(TrafficClass::Get));
        assert_eq!(TrafficClass::of(IqType::Set), Some(TrafficClass::Set));
        assert_eq!(TrafficClass::of(IqType::Result), None);
        assert_eq!(TrafficClass::of(IqType::Error), None);
    }
}
