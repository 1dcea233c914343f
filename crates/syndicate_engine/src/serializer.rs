//! Entity handlers: translation between entities and wire envelopes.

use crate::entity::Entity;
use crate::error::EngineResult;
use serde_json::{json, Value};
use syndicate_config::EntityTypeRule;
use syndicate_protocol::EntityEnvelope;
use uuid::Uuid;

/// Translates between the neutral entity shape and the wire envelope.
///
/// Handlers are registered by name on the engine; flows select one per
/// entity type rule. Returning `Ok(false)` from either direction vetoes the
/// transfer without raising an error.
pub trait EntityHandler: Send + Sync {
    /// Copies entity fields onto the envelope. `Ok(false)` vetoes the export.
    fn serialize(
        &self,
        entity: &Entity,
        rule: &EntityTypeRule,
        envelope: &mut EntityEnvelope,
    ) -> EngineResult<bool>;

    /// Copies envelope fields onto the entity. `Ok(false)` vetoes the import.
    fn deserialize(
        &self,
        envelope: &EntityEnvelope,
        rule: &EntityTypeRule,
        entity: &mut Entity,
    ) -> EngineResult<bool>;
}

/// The default handler: copies fields verbatim, honoring field overrides.
#[derive(Debug, Default)]
pub struct GenericHandler;

impl EntityHandler for GenericHandler {
    fn serialize(
        &self,
        entity: &Entity,
        rule: &EntityTypeRule,
        envelope: &mut EntityEnvelope,
    ) -> EngineResult<bool> {
        for (name, value) in &entity.fields {
            if rule.field_syncs(name) {
                envelope.set_field(name.clone(), value.clone());
            }
        }
        for (language, fields) in &entity.translations {
            for (name, value) in fields {
                if rule.field_syncs(name) {
                    envelope.set_translation(language.clone(), name.clone(), value.clone());
                }
            }
        }
        Ok(true)
    }

    fn deserialize(
        &self,
        envelope: &EntityEnvelope,
        rule: &EntityTypeRule,
        entity: &mut Entity,
    ) -> EngineResult<bool> {
        if let Some(title) = &envelope.title {
            entity.label = Some(title.clone());
        }
        for (name, value) in &envelope.fields {
            if rule.field_syncs(name) {
                entity.set_field(name.clone(), value.clone());
            }
        }
        for (language, fields) in &envelope.apiu_translation {
            for (name, value) in fields {
                if rule.field_syncs(name) {
                    entity.set_translation(language.clone(), name.clone(), value.clone());
                }
            }
        }
        Ok(true)
    }
}

/// One target of an entity reference field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
    /// Entity type of the referenced entity.
    pub entity_type: String,
    /// Bundle of the referenced entity.
    pub bundle: String,
    /// UUID of the referenced entity.
    pub uuid: Uuid,
}

/// Builds the wire descriptor of a reference to an entity.
pub fn reference_descriptor(entity: &Entity) -> Value {
    let mut descriptor = json!({
        "uuid": entity.uuid,
        "type": entity.entity_type,
        "bundle": entity.bundle,
    });
    if let (Some(id), Some(object)) = (&entity.local_id, descriptor.as_object_mut()) {
        object.insert("id".into(), json!(id));
    }
    descriptor
}

/// Extracts the reference targets of a field value.
///
/// Accepts a single descriptor object or an array of them; anything that is
/// not a complete descriptor is ignored.
pub fn reference_targets(value: &Value) -> Vec<ReferenceTarget> {
    match value {
        Value::Array(items) => items.iter().filter_map(target_of).collect(),
        other => target_of(other).into_iter().collect(),
    }
}

/// Extracts just the target UUIDs of a field value.
pub fn reference_uuids(value: &Value) -> Vec<Uuid> {
    reference_targets(value).into_iter().map(|t| t.uuid).collect()
}

fn target_of(value: &Value) -> Option<ReferenceTarget> {
    let object = value.as_object()?;
    let uuid = Uuid::parse_str(object.get("uuid")?.as_str()?).ok()?;
    Some(ReferenceTarget {
        entity_type: object.get("type")?.as_str()?.to_string(),
        bundle: object.get("bundle")?.as_str()?.to_string(),
        uuid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use syndicate_config::FieldRule;

    fn rule() -> EntityTypeRule {
        EntityTypeRule::new("default", "v1")
            .with_field_override("internal_notes", FieldRule::ignored())
    }

    #[test]
    fn generic_serialize_honors_overrides() {
        let mut entity = Entity::new("node", "article", Uuid::new_v4());
        entity.set_field("body", json!("text"));
        entity.set_field("internal_notes", json!("secret"));

        let mut envelope = EntityEnvelope::new(entity.uuid, 0, 0);
        let allowed = GenericHandler
            .serialize(&entity, &rule(), &mut envelope)
            .unwrap();

        assert!(allowed);
        assert_eq!(envelope.field("body"), Some(&json!("text")));
        assert_eq!(envelope.field("internal_notes"), None);
    }

    #[test]
    fn generic_deserialize_copies_title_and_fields() {
        let uuid = Uuid::new_v4();
        let mut envelope = EntityEnvelope::new(uuid, 0, 0).with_title("Hello");
        envelope.set_field("body", json!("text"));
        envelope.set_field("internal_notes", json!("secret"));

        let mut entity = Entity::new("node", "article", uuid);
        let allowed = GenericHandler
            .deserialize(&envelope, &rule(), &mut entity)
            .unwrap();

        assert!(allowed);
        assert_eq!(entity.label.as_deref(), Some("Hello"));
        assert_eq!(entity.field("body"), Some(&json!("text")));
        assert_eq!(entity.field("internal_notes"), None);
    }

    #[test]
    fn translations_pass_through() {
        let uuid = Uuid::new_v4();
        let mut entity = Entity::new("node", "article", uuid);
        entity.set_translation("de", "body", json!("Hallo"));
        entity.set_translation("de", "internal_notes", json!("geheim"));

        let mut envelope = EntityEnvelope::new(uuid, 0, 0);
        GenericHandler
            .serialize(&entity, &rule(), &mut envelope)
            .unwrap();
        let german = envelope.apiu_translation.get("de").unwrap();
        assert_eq!(german.get("body"), Some(&json!("Hallo")));
        assert_eq!(german.get("internal_notes"), None);

        let mut back = Entity::new("node", "article", uuid);
        GenericHandler
            .deserialize(&envelope, &rule(), &mut back)
            .unwrap();
        assert_eq!(back.translation("de", "body"), Some(&json!("Hallo")));
    }

    #[test]
    fn descriptor_roundtrip() {
        let entity = Entity::new("file", "image", Uuid::new_v4()).with_local_id("7");
        let descriptor = reference_descriptor(&entity);

        let targets = reference_targets(&descriptor);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].entity_type, "file");
        assert_eq!(targets[0].bundle, "image");
        assert_eq!(targets[0].uuid, entity.uuid);
    }

    #[test]
    fn targets_of_arrays_and_garbage() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let value = json!([
            {"uuid": a.to_string(), "type": "node", "bundle": "article"},
            {"uuid": "not-a-uuid", "type": "node", "bundle": "article"},
            {"uuid": b.to_string(), "type": "file", "bundle": "image"},
            "plain string",
        ]);

        let uuids = reference_uuids(&value);
        assert_eq!(uuids, vec![a, b]);

        assert!(reference_targets(&json!("scalar")).is_empty());
        assert!(reference_targets(&json!(null)).is_empty());
    }
}
