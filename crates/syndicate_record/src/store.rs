//! Record store trait and the in-memory reference implementation.

use crate::error::RecordResult;
use crate::record::{EntityHandle, EntityRef, FlowRef, SyncRecord};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Flow filter for record lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowFilter {
    /// All flows, including orphans.
    Any,
    /// Only orphaned (no-flow) records.
    Orphaned,
    /// Only records of one configured flow.
    Flow(String),
}

impl FlowFilter {
    fn matches(&self, flow: &FlowRef) -> bool {
        match self {
            FlowFilter::Any => true,
            FlowFilter::Orphaned => flow.is_no_flow(),
            FlowFilter::Flow(id) => flow.id() == Some(id),
        }
    }
}

/// Persistent store of sync records.
///
/// There is no built-in locking: callers must treat "load, mutate, save" as
/// one unit of work and serialize intents per entity (see the engine crate).
///
/// # Contract
///
/// `save` of a record with a configured flow and a non-null last-import
/// timestamp must delete any orphaned ([`FlowRef::NoFlow`]) record for the
/// same (entity, pool) pair.
pub trait RecordStore: Send + Sync {
    /// Finds records for an entity, filtered by flow and optionally by pool.
    fn find(
        &self,
        entity: &EntityRef,
        flow: FlowFilter,
        pool: Option<&str>,
    ) -> RecordResult<Vec<SyncRecord>>;

    /// Loads one record by its full key.
    fn get(&self, entity: &EntityRef, flow: &FlowRef, pool: &str)
        -> RecordResult<Option<SyncRecord>>;

    /// Loads a record, creating a fresh one if absent.
    ///
    /// This is the only creation path, keeping the one-record-per-key
    /// invariant.
    fn get_or_create(
        &self,
        entity: &EntityRef,
        flow: FlowRef,
        pool: &str,
    ) -> RecordResult<SyncRecord>;

    /// Persists a record, applying the orphan-cleanup contract.
    fn save(&self, record: &SyncRecord) -> RecordResult<()>;

    /// Deletes one record by its full key.
    fn delete(&self, entity: &EntityRef, flow: &FlowRef, pool: &str) -> RecordResult<()>;

    /// Deletes all records of an entity (entity deletion cascade).
    fn delete_for_entity(&self, entity: &EntityRef) -> RecordResult<()>;
}

type RecordKey = (String, EntityHandle, FlowRef, String);

fn key_of(record: &SyncRecord) -> RecordKey {
    (
        record.entity.entity_type.clone(),
        record.entity.entity_id.clone(),
        record.flow.clone(),
        record.pool_id.clone(),
    )
}

/// An in-memory record store.
///
/// The reference implementation of the store contract and the test double
/// used throughout the engine tests.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<RecordKey, SyncRecord>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn find(
        &self,
        entity: &EntityRef,
        flow: FlowFilter,
        pool: Option<&str>,
    ) -> RecordResult<Vec<SyncRecord>> {
        let records = self.records.read();
        Ok(records
            .values()
            .filter(|r| r.entity == *entity)
            .filter(|r| flow.matches(&r.flow))
            .filter(|r| pool.map_or(true, |p| r.pool_id == p))
            .cloned()
            .collect())
    }

    fn get(
        &self,
        entity: &EntityRef,
        flow: &FlowRef,
        pool: &str,
    ) -> RecordResult<Option<SyncRecord>> {
        let key = (
            entity.entity_type.clone(),
            entity.entity_id.clone(),
            flow.clone(),
            pool.to_string(),
        );
        Ok(self.records.read().get(&key).cloned())
    }

    fn get_or_create(
        &self,
        entity: &EntityRef,
        flow: FlowRef,
        pool: &str,
    ) -> RecordResult<SyncRecord> {
        if let Some(existing) = self.get(entity, &flow, pool)? {
            return Ok(existing);
        }
        let record = SyncRecord::new(entity.clone(), flow, pool);
        self.save(&record)?;
        Ok(record)
    }

    fn save(&self, record: &SyncRecord) -> RecordResult<()> {
        let mut records = self.records.write();
        if !record.flow.is_no_flow() && record.was_imported() {
            // A real import succeeded: purge the orphaned error record
            // for this entity/pool pair.
            let orphan_key = (
                record.entity.entity_type.clone(),
                record.entity.entity_id.clone(),
                FlowRef::NoFlow,
                record.pool_id.clone(),
            );
            records.remove(&orphan_key);
        }
        records.insert(key_of(record), record.clone());
        Ok(())
    }

    fn delete(&self, entity: &EntityRef, flow: &FlowRef, pool: &str) -> RecordResult<()> {
        let key = (
            entity.entity_type.clone(),
            entity.entity_id.clone(),
            flow.clone(),
            pool.to_string(),
        );
        self.records.write().remove(&key);
        Ok(())
    }

    fn delete_for_entity(&self, entity: &EntityRef) -> RecordResult<()> {
        self.records
            .write()
            .retain(|_, r| r.entity != *entity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entity() -> EntityRef {
        EntityRef::new("node", Uuid::new_v4())
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = MemoryRecordStore::new();
        let entity = entity();
        let flow = FlowRef::Flow("content".into());

        let mut first = store.get_or_create(&entity, flow.clone(), "main").unwrap();
        first.flags.export_enabled = true;
        store.save(&first).unwrap();

        let second = store.get_or_create(&entity, flow, "main").unwrap();
        assert!(second.flags.export_enabled);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn find_filters_by_flow_and_pool() {
        let store = MemoryRecordStore::new();
        let entity = entity();

        store
            .get_or_create(&entity, FlowRef::Flow("content".into()), "main")
            .unwrap();
        store
            .get_or_create(&entity, FlowRef::Flow("media".into()), "main")
            .unwrap();
        store
            .get_or_create(&entity, FlowRef::NoFlow, "other")
            .unwrap();

        let all = store.find(&entity, FlowFilter::Any, None).unwrap();
        assert_eq!(all.len(), 3);

        let orphans = store.find(&entity, FlowFilter::Orphaned, None).unwrap();
        assert_eq!(orphans.len(), 1);

        let content = store
            .find(&entity, FlowFilter::Flow("content".into()), Some("main"))
            .unwrap();
        assert_eq!(content.len(), 1);

        let wrong_pool = store
            .find(&entity, FlowFilter::Flow("content".into()), Some("other"))
            .unwrap();
        assert!(wrong_pool.is_empty());
    }

    #[test]
    fn successful_import_purges_orphan() {
        let store = MemoryRecordStore::new();
        let entity = entity();

        // Inbound sync without a matching flow leaves an error-only record.
        store
            .get_or_create(&entity, FlowRef::NoFlow, "main")
            .unwrap();

        let mut record = store
            .get_or_create(&entity, FlowRef::Flow("content".into()), "main")
            .unwrap();
        record.set_last_import(Some(1_700_000_000_000));
        store.save(&record).unwrap();

        let orphans = store.find(&entity, FlowFilter::Orphaned, None).unwrap();
        assert!(orphans.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn orphan_in_other_pool_survives() {
        let store = MemoryRecordStore::new();
        let entity = entity();

        store
            .get_or_create(&entity, FlowRef::NoFlow, "other")
            .unwrap();

        let mut record = store
            .get_or_create(&entity, FlowRef::Flow("content".into()), "main")
            .unwrap();
        record.set_last_import(Some(1));
        store.save(&record).unwrap();

        let orphans = store.find(&entity, FlowFilter::Orphaned, None).unwrap();
        assert_eq!(orphans.len(), 1);
    }

    #[test]
    fn delete_for_entity_cascades() {
        let store = MemoryRecordStore::new();
        let entity = entity();
        let other = EntityRef::new("node", Uuid::new_v4());

        store
            .get_or_create(&entity, FlowRef::Flow("content".into()), "main")
            .unwrap();
        store
            .get_or_create(&entity, FlowRef::Flow("media".into()), "main")
            .unwrap();
        store
            .get_or_create(&other, FlowRef::Flow("content".into()), "main")
            .unwrap();

        store.delete_for_entity(&entity).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.find(&entity, FlowFilter::Any, None).unwrap().is_empty());
    }
}
