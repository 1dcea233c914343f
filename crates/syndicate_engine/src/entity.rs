//! The host entity seam: a neutral entity model and the store trait.

use crate::error::EngineResult;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use syndicate_record::EntityRef;
use uuid::Uuid;

/// A content entity as the engine sees it.
///
/// The engine never interprets field values; handlers translate between
/// this neutral shape and the wire envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Entity type machine name.
    pub entity_type: String,
    /// Bundle machine name.
    pub bundle: String,
    /// Shared UUID.
    pub uuid: Uuid,
    /// Local id on this site, if the host store assigned one.
    pub local_id: Option<String>,
    /// Human readable label.
    pub label: Option<String>,
    /// Canonical URL on this site.
    pub url: Option<String>,
    /// Creation timestamp (unix millis).
    pub created: u64,
    /// Last change timestamp (unix millis).
    pub changed: u64,
    /// Field values, opaque to the engine.
    pub fields: BTreeMap<String, Value>,
    /// Per-language field value overrides: language → field → value.
    pub translations: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Entity {
    /// Creates an entity with empty fields.
    pub fn new(entity_type: impl Into<String>, bundle: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            uuid,
            local_id: None,
            label: None,
            url: None,
            created: 0,
            changed: 0,
            fields: BTreeMap::new(),
            translations: BTreeMap::new(),
        }
    }

    /// Sets the local id.
    pub fn with_local_id(mut self, id: impl Into<String>) -> Self {
        self.local_id = Some(id.into());
        self
    }

    /// Sets the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the canonical URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the creation and change timestamps.
    pub fn with_timestamps(mut self, created: u64, changed: u64) -> Self {
        self.created = created;
        self.changed = changed;
        self
    }

    /// Sets a field value.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Gets a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a translated field value.
    pub fn set_translation(
        &mut self,
        language: impl Into<String>,
        field: impl Into<String>,
        value: Value,
    ) {
        self.translations
            .entry(language.into())
            .or_default()
            .insert(field.into(), value);
    }

    /// Gets a translated field value.
    pub fn translation(&self, language: &str, field: &str) -> Option<&Value> {
        self.translations.get(language)?.get(field)
    }

    /// The record key identity of this entity.
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type.clone(), self.uuid)
    }
}

/// Schema information for one field of an entity type + bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field machine name.
    pub name: String,
    /// Whether the field holds an ordered list of values.
    pub multiple: bool,
    /// Whether values are references to other entities.
    pub is_entity_reference: bool,
}

impl FieldDescriptor {
    /// Creates a plain single-valued field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multiple: false,
            is_entity_reference: false,
        }
    }

    /// Creates a single-valued entity reference field.
    pub fn reference(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multiple: false,
            is_entity_reference: true,
        }
    }

    /// Marks the field as multi-valued.
    pub fn with_multiple(mut self) -> Self {
        self.multiple = true;
        self
    }
}

/// Access to the host content store.
///
/// Implemented by the embedding application. The engine loads, saves and
/// deletes entities through this seam and reads the field schema to detect
/// references and compute schema versions.
pub trait EntityStore: Send + Sync {
    /// Loads an entity by type and UUID.
    fn load(&self, entity_type: &str, uuid: Uuid) -> EngineResult<Option<Entity>>;

    /// Loads an entity by type and local id.
    fn load_by_local_id(&self, entity_type: &str, id: &str) -> EngineResult<Option<Entity>>;

    /// Creates or updates an entity.
    fn save(&self, entity: &Entity) -> EngineResult<()>;

    /// Deletes an entity. Deleting a missing entity is not an error.
    fn delete(&self, entity_type: &str, uuid: Uuid) -> EngineResult<()>;

    /// Returns the field schema of an entity type + bundle.
    fn field_definitions(&self, entity_type: &str, bundle: &str)
        -> EngineResult<Vec<FieldDescriptor>>;
}

/// An in-memory entity store, used as the engine's test double.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    entities: RwLock<BTreeMap<(String, Uuid), Entity>>,
    fields: RwLock<BTreeMap<(String, String), Vec<FieldDescriptor>>>,
}

impl MemoryEntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the field schema of an entity type + bundle.
    pub fn define_fields(
        &self,
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        fields: Vec<FieldDescriptor>,
    ) {
        self.fields
            .write()
            .insert((entity_type.into(), bundle.into()), fields);
    }

    /// Inserts an entity directly.
    pub fn insert(&self, entity: Entity) {
        self.entities
            .write()
            .insert((entity.entity_type.clone(), entity.uuid), entity);
    }

    /// Returns true if an entity exists.
    pub fn contains(&self, entity_type: &str, uuid: Uuid) -> bool {
        self.entities
            .read()
            .contains_key(&(entity_type.to_string(), uuid))
    }

    /// Returns the number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true if no entities are stored.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

impl EntityStore for MemoryEntityStore {
    fn load(&self, entity_type: &str, uuid: Uuid) -> EngineResult<Option<Entity>> {
        Ok(self
            .entities
            .read()
            .get(&(entity_type.to_string(), uuid))
            .cloned())
    }

    fn load_by_local_id(&self, entity_type: &str, id: &str) -> EngineResult<Option<Entity>> {
        Ok(self
            .entities
            .read()
            .values()
            .find(|e| e.entity_type == entity_type && e.local_id.as_deref() == Some(id))
            .cloned())
    }

    fn save(&self, entity: &Entity) -> EngineResult<()> {
        self.insert(entity.clone());
        Ok(())
    }

    fn delete(&self, entity_type: &str, uuid: Uuid) -> EngineResult<()> {
        self.entities
            .write()
            .remove(&(entity_type.to_string(), uuid));
        Ok(())
    }

    fn field_definitions(
        &self,
        entity_type: &str,
        bundle: &str,
    ) -> EngineResult<Vec<FieldDescriptor>> {
        Ok(self
            .fields
            .read()
            .get(&(entity_type.to_string(), bundle.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
