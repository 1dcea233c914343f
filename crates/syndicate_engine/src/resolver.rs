//! Forward-dependency resolver: the durable waiting list and its replay.
//!
//! An import that references an entity this site does not have yet queues a
//! waiting entry keyed by the missing entity. When that entity later
//! arrives, the entries are replayed: scalar reference fields are fixed up
//! in place, multi-valued fields trigger a resync of the waiting entity so
//! ordering is reconciled by the regular import path.

use crate::engine::SyncEngine;
use crate::entity::Entity;
use crate::error::{EngineError, EngineResult};
use crate::serializer::reference_descriptor;
use crate::transport::{entity_endpoint, Method};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use syndicate_config::{SyncAction, SyncReason};
use syndicate_record::{EntityRef, FlowFilter, SyncRecord};
use uuid::Uuid;

/// One entity waiting for a missing dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitingEntry {
    /// Entity type of the waiting entity.
    pub entity_type: String,
    /// UUID of the waiting entity.
    pub uuid: Uuid,
    /// Reason of the import that hit the missing dependency.
    pub reason: SyncReason,
    /// The reference field that could not be resolved, if known.
    pub field: Option<String>,
    /// Handler-private payload carried through the wait.
    pub extra: Option<Value>,
}

impl WaitingEntry {
    /// Creates an entry without field information.
    pub fn new(entity_type: impl Into<String>, uuid: Uuid, reason: SyncReason) -> Self {
        Self {
            entity_type: entity_type.into(),
            uuid,
            reason,
            field: None,
            extra: None,
        }
    }

    /// Names the unresolved reference field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Durable store of waiting entries, keyed by the awaited entity.
pub trait DependencyStore: Send + Sync {
    /// Loads the entries waiting for an entity.
    fn load(&self, awaited: &EntityRef) -> EngineResult<Vec<WaitingEntry>>;

    /// Replaces the entries waiting for an entity.
    fn save(&self, awaited: &EntityRef, entries: &[WaitingEntry]) -> EngineResult<()>;

    /// Drops all entries waiting for an entity.
    fn clear(&self, awaited: &EntityRef) -> EngineResult<()>;
}

/// An in-memory dependency store.
#[derive(Debug, Default)]
pub struct MemoryDependencyStore {
    entries: RwLock<BTreeMap<EntityRef, Vec<WaitingEntry>>>,
}

impl MemoryDependencyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of awaited entities.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is awaited.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DependencyStore for MemoryDependencyStore {
    fn load(&self, awaited: &EntityRef) -> EngineResult<Vec<WaitingEntry>> {
        Ok(self.entries.read().get(awaited).cloned().unwrap_or_default())
    }

    fn save(&self, awaited: &EntityRef, entries: &[WaitingEntry]) -> EngineResult<()> {
        self.entries.write().insert(awaited.clone(), entries.to_vec());
        Ok(())
    }

    fn clear(&self, awaited: &EntityRef) -> EngineResult<()> {
        self.entries.write().remove(awaited);
        Ok(())
    }
}

impl SyncEngine {
    /// Queues a waiting entry, de-duplicated by (entity, field).
    pub fn save_unresolved(&self, awaited: &EntityRef, entry: WaitingEntry) -> EngineResult<()> {
        let mut entries = self.dependencies.load(awaited)?;
        if entries
            .iter()
            .any(|e| e.uuid == entry.uuid && e.field == entry.field)
        {
            return Ok(());
        }
        entries.push(entry);
        self.dependencies.save(awaited, &entries)
    }

    /// Replays everything that waited for a newly arrived entity.
    ///
    /// Scalar reference fields are fixed up directly. Multi-valued fields
    /// and entries without field information request a resync of the
    /// waiting entity instead, so the regular import path reconciles
    /// ordering. Entries whose flow no longer permits the import are
    /// skipped. Replay is best effort: a failing resync is logged and the
    /// remaining entries still run, and the waiting list is cleared either
    /// way to stop unresolvable entries from looping forever.
    pub fn resolve_dependencies(&self, resolved: &Entity) -> EngineResult<()> {
        let awaited = resolved.entity_ref();
        let entries = self.dependencies.load(&awaited)?;
        if entries.is_empty() {
            return Ok(());
        }

        for entry in &entries {
            let Some(mut waiting) = self.entities.load(&entry.entity_type, entry.uuid)? else {
                continue;
            };
            // The flow may have been reconfigured since the entry was queued.
            if self.import_route(&waiting, entry.reason)?.is_none() {
                tracing::debug!(
                    entity = %waiting.entity_ref(),
                    dependency = %awaited,
                    "replay skipped, import no longer permitted"
                );
                continue;
            }
            match &entry.field {
                Some(field) => {
                    let definitions = self
                        .entities
                        .field_definitions(&waiting.entity_type, &waiting.bundle)?;
                    let multiple = definitions
                        .iter()
                        .find(|d| d.name == *field)
                        .is_some_and(|d| d.multiple);
                    if multiple {
                        self.resync_or_log(&waiting, entry.reason, &awaited);
                    } else {
                        waiting.set_field(field.clone(), reference_descriptor(resolved));
                        self.entities.save(&waiting)?;
                    }
                }
                None => self.resync_or_log(&waiting, entry.reason, &awaited),
            }
        }

        self.dependencies.clear(&awaited)
    }

    fn resync_or_log(&self, waiting: &Entity, reason: SyncReason, awaited: &EntityRef) {
        if let Err(error) = self.request_resync(waiting, reason) {
            tracing::warn!(
                entity = %waiting.entity_ref(),
                dependency = %awaited,
                "resync request failed: {error}"
            );
        }
    }

    /// Asks the broker to push an entity again.
    ///
    /// Addressed at the pool the entity was last imported from; a no-op when
    /// no imported record exists or the flow no longer permits the import.
    pub fn request_resync(&self, entity: &Entity, reason: SyncReason) -> EngineResult<()> {
        let Some(record) = self.import_route(entity, reason)? else {
            return Ok(());
        };
        let Some(pool) = self.config.pool(&record.pool_id) else {
            return Ok(());
        };

        let url = entity_endpoint(
            pool,
            &entity.entity_type,
            &entity.bundle,
            &record.entity_type_version,
            Some(&entity.uuid.to_string()),
        );
        let body = serde_json::json!({ "action": "request_sync", "reason": reason });
        let response = self.transport.request(Method::Post, &url, Some(&body))?;
        if !response.is_success() {
            return Err(EngineError::InvalidStatusCode {
                status: response.status,
                url,
            });
        }
        Ok(())
    }

    /// Finds the imported record whose flow still permits updating the
    /// entity from its pool, if any.
    fn import_route(&self, entity: &Entity, reason: SyncReason) -> EngineResult<Option<SyncRecord>> {
        let records = self.records.find(&entity.entity_ref(), FlowFilter::Any, None)?;
        let Some(record) = records
            .into_iter()
            .find(|r| r.was_imported() && !r.flow.is_no_flow())
        else {
            return Ok(None);
        };
        let Some(flow) = record.flow.id().and_then(|id| self.config.flow(id)) else {
            return Ok(None);
        };
        if !flow.can_import(
            &entity.entity_type,
            &entity.bundle,
            reason,
            SyncAction::Update,
            Some(&record.pool_id),
        ) {
            return Ok(None);
        }
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awaited() -> EntityRef {
        EntityRef::new("file", Uuid::new_v4())
    }

    #[test]
    fn store_replaces_and_clears() {
        let store = MemoryDependencyStore::new();
        let awaited = awaited();

        let entry = WaitingEntry::new("node", Uuid::new_v4(), SyncReason::AsDependency)
            .with_field("field_image");
        store.save(&awaited, std::slice::from_ref(&entry)).unwrap();
        assert_eq!(store.load(&awaited).unwrap(), vec![entry.clone()]);
        assert_eq!(store.len(), 1);

        store.save(&awaited, &[]).unwrap();
        assert!(store.load(&awaited).unwrap().is_empty());

        store.save(&awaited, &[entry]).unwrap();
        store.clear(&awaited).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn load_of_unknown_key_is_empty() {
        let store = MemoryDependencyStore::new();
        assert!(store.load(&awaited()).unwrap().is_empty());
    }
}
