//! The sync engine: wiring of the seams and shared helpers.

use crate::entity::EntityStore;
use crate::error::EngineResult;
use crate::events::{EventSink, NullSink};
use crate::resolver::{DependencyStore, MemoryDependencyStore};
use crate::serializer::{EntityHandler, GenericHandler};
use crate::transport::BrokerTransport;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use syndicate_config::{EntityTypeRule, SiteConfig};
use syndicate_protocol::schema_version;
use syndicate_record::RecordStore;

/// Name of the handler registered by default.
pub(crate) const DEFAULT_HANDLER: &str = "default";

/// The synchronization engine of one site.
///
/// Holds the site configuration and the five seams: records, entities,
/// transport, the dependency waiting list and the event sink. The engine is
/// stateless across calls; all per-unit state lives in a
/// [`crate::SyncContext`] owned by the caller.
pub struct SyncEngine {
    pub(crate) config: SiteConfig,
    pub(crate) records: Arc<dyn RecordStore>,
    pub(crate) entities: Arc<dyn EntityStore>,
    pub(crate) transport: Arc<dyn BrokerTransport>,
    pub(crate) dependencies: Arc<dyn DependencyStore>,
    pub(crate) events: Arc<dyn EventSink>,
    handlers: BTreeMap<String, Arc<dyn EntityHandler>>,
}

impl SyncEngine {
    /// Creates an engine with default handler, dependency store and sink.
    pub fn new(
        config: SiteConfig,
        records: Arc<dyn RecordStore>,
        entities: Arc<dyn EntityStore>,
        transport: Arc<dyn BrokerTransport>,
    ) -> Self {
        let mut handlers: BTreeMap<String, Arc<dyn EntityHandler>> = BTreeMap::new();
        handlers.insert(DEFAULT_HANDLER.to_string(), Arc::new(GenericHandler));
        Self {
            config,
            records,
            entities,
            transport,
            dependencies: Arc::new(MemoryDependencyStore::new()),
            events: Arc::new(NullSink),
            handlers,
        }
    }

    /// Replaces the dependency waiting-list store.
    pub fn with_dependency_store(mut self, store: Arc<dyn DependencyStore>) -> Self {
        self.dependencies = store;
        self
    }

    /// Replaces the event sink.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Registers a handler under a name.
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn EntityHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// The site configuration.
    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Resolves the handler a rule names.
    pub(crate) fn handler(&self, rule: &EntityTypeRule) -> Option<Arc<dyn EntityHandler>> {
        let name = rule.handler.as_deref()?;
        self.handlers.get(name).cloned()
    }

    /// Computes the current schema version of an entity type + bundle from
    /// the host field schema.
    pub fn schema_version_of(&self, entity_type: &str, bundle: &str) -> EngineResult<String> {
        let definitions = self.entities.field_definitions(entity_type, bundle)?;
        let names: Vec<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
        Ok(schema_version(entity_type, bundle, &names))
    }

    /// Current wall-clock time in unix millis.
    pub(crate) fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
