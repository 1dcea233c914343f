//! The synchronization record and its flag invariants.

use crate::data::RecordData;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies an entity within the host content store.
///
/// Content entities are addressed by UUID; singleton and configuration
/// entities without a UUID use their local machine id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityHandle {
    /// A UUID-addressed entity.
    Uuid(Uuid),
    /// A locally-addressed singleton or config entity.
    Local(String),
}

impl EntityHandle {
    /// Returns the UUID if this handle is UUID-addressed.
    pub fn uuid(&self) -> Option<Uuid> {
        match self {
            EntityHandle::Uuid(uuid) => Some(*uuid),
            EntityHandle::Local(_) => None,
        }
    }

    /// Returns the shared identifier used in broker URLs.
    pub fn shared_id(&self) -> String {
        match self {
            EntityHandle::Uuid(uuid) => uuid.to_string(),
            EntityHandle::Local(id) => id.clone(),
        }
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityHandle::Uuid(uuid) => write!(f, "{uuid}"),
            EntityHandle::Local(id) => write!(f, "{id}"),
        }
    }
}

impl From<Uuid> for EntityHandle {
    fn from(uuid: Uuid) -> Self {
        EntityHandle::Uuid(uuid)
    }
}

/// Entity type plus handle: the identity half of a record key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity type machine name.
    pub entity_type: String,
    /// Entity handle.
    pub entity_id: EntityHandle,
}

impl EntityRef {
    /// Creates a new entity reference.
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<EntityHandle>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

/// The flow half of a record key.
///
/// Inbound syncs that cannot be matched to any configured flow produce
/// error-only records under [`FlowRef::NoFlow`]. Those orphans are purged as
/// soon as the entity gets a real successful import for the same pool.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowRef {
    /// A configured flow.
    Flow(String),
    /// No flow matched; the record only carries failure state.
    NoFlow,
}

impl FlowRef {
    /// Returns true for the orphan sentinel.
    pub fn is_no_flow(&self) -> bool {
        matches!(self, FlowRef::NoFlow)
    }

    /// Returns the flow id for configured flows.
    pub fn id(&self) -> Option<&str> {
        match self {
            FlowRef::Flow(id) => Some(id),
            FlowRef::NoFlow => None,
        }
    }
}

/// Named boolean flags of a sync record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFlags {
    /// The entity was deleted on this side.
    pub deleted: bool,
    /// A user explicitly allowed exporting this entity.
    pub user_allowed_export: bool,
    /// Local edits override remote updates for this entity.
    pub local_edit_override: bool,
    /// This site is the authoritative source of the entity.
    pub is_source_entity: bool,
    /// Export to the record's pool is enabled.
    pub export_enabled: bool,
    /// Export as a dependency to the record's pool is enabled.
    pub dependency_export_enabled: bool,
    /// The export timestamp was reset to null.
    pub last_export_was_reset: bool,
    /// The import timestamp was reset to null.
    pub last_import_was_reset: bool,
    /// The last export failed hard.
    pub export_failed: bool,
    /// The last import failed hard.
    pub import_failed: bool,
    /// The last export ended in an expected soft failure.
    pub export_failed_soft: bool,
    /// The last import ended in an expected soft failure.
    pub import_failed_soft: bool,
}

/// Synchronization state of one entity for one (flow, pool) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// The entity this record tracks.
    pub entity: EntityRef,
    /// The flow, or the orphan sentinel.
    pub flow: FlowRef,
    /// The pool id.
    pub pool_id: String,
    /// Hash of the entity type schema at the last sync.
    pub entity_type_version: String,
    /// Named flags.
    pub flags: RecordFlags,
    /// Handler-private side tables.
    pub data: RecordData,
    last_export_at: Option<u64>,
    last_import_at: Option<u64>,
}

impl SyncRecord {
    /// Creates a fresh record with no sync history.
    pub fn new(entity: EntityRef, flow: FlowRef, pool_id: impl Into<String>) -> Self {
        Self {
            entity,
            flow,
            pool_id: pool_id.into(),
            entity_type_version: String::new(),
            flags: RecordFlags::default(),
            data: RecordData::default(),
            last_export_at: None,
            last_import_at: None,
        }
    }

    /// Returns the last export timestamp (unix millis).
    pub fn last_export_at(&self) -> Option<u64> {
        self.last_export_at
    }

    /// Returns the last import timestamp (unix millis).
    pub fn last_import_at(&self) -> Option<u64> {
        self.last_import_at
    }

    /// Returns true if the entity was ever exported to this pool.
    pub fn was_exported(&self) -> bool {
        self.last_export_at.is_some()
    }

    /// Returns true if the entity was ever imported from this pool.
    pub fn was_imported(&self) -> bool {
        self.last_import_at.is_some()
    }

    /// Sets or resets the last export timestamp.
    ///
    /// A reset (`None`) sets `last_export_was_reset`; a real timestamp clears
    /// it. Both clear the export failure flags.
    pub fn set_last_export(&mut self, timestamp: Option<u64>) {
        self.flags.last_export_was_reset = timestamp.is_none();
        self.flags.export_failed = false;
        self.flags.export_failed_soft = false;
        self.last_export_at = timestamp;
    }

    /// Sets or resets the last import timestamp.
    ///
    /// Mirror of [`SyncRecord::set_last_export`] for the import direction.
    pub fn set_last_import(&mut self, timestamp: Option<u64>) {
        self.flags.last_import_was_reset = timestamp.is_none();
        self.flags.import_failed = false;
        self.flags.import_failed_soft = false;
        self.last_import_at = timestamp;
    }

    /// Marks the entity as deleted on this side.
    pub fn mark_deleted(&mut self) {
        self.flags.deleted = true;
    }

    /// Records an export failure with structured detail.
    ///
    /// Soft (expected) failures set `export_failed_soft`, hard failures set
    /// `export_failed`. The detail is kept in the data side table so it stays
    /// observable even when the error propagates to the caller.
    pub fn record_export_failure(&mut self, detail: crate::data::FailureDetail) {
        if detail.kind.is_soft() {
            self.flags.export_failed_soft = true;
        } else {
            self.flags.export_failed = true;
        }
        self.data.failure = Some(detail);
    }

    /// Records an import failure with structured detail.
    pub fn record_import_failure(&mut self, detail: crate::data::FailureDetail) {
        if detail.kind.is_soft() {
            self.flags.import_failed_soft = true;
        } else {
            self.flags.import_failed = true;
        }
        self.data.failure = Some(detail);
    }
}
