//! The per-entity wire envelope.

use crate::embed::EmbeddedRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The JSON object exchanged per entity transfer.
///
/// Field values are opaque to the core: handlers produce and consume them,
/// the envelope only transports them. They are flattened into the top-level
/// object on the wire, next to the fixed keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEnvelope {
    /// Entity UUID.
    pub uuid: Uuid,
    /// Local id on the sending site, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Entity label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Canonical URL on the sending site.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Preview markup for the broker dashboard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    /// Creation timestamp (unix millis).
    pub created: u64,
    /// Last change timestamp (unix millis).
    pub changed: u64,
    /// Referenced entities, embedded or resolvable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embed_entities: Vec<EmbeddedRef>,
    /// Per-language field value overrides: language → field → value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub apiu_translation: BTreeMap<String, BTreeMap<String, Value>>,
    /// Handler-specific field values, flattened on the wire.
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl EntityEnvelope {
    /// Creates an envelope with the fixed identity keys.
    pub fn new(uuid: Uuid, created: u64, changed: u64) -> Self {
        Self {
            uuid,
            id: None,
            title: None,
            url: None,
            preview: None,
            created,
            changed,
            embed_entities: Vec::new(),
            apiu_translation: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Sets the sending site's local id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the label.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the canonical URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
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
        self.apiu_translation
            .entry(language.into())
            .or_default()
            .insert(field.into(), value);
    }

    /// Adds an embedded reference and returns its index.
    pub fn push_embed(&mut self, embed: EmbeddedRef) -> usize {
        self.embed_entities.push(embed);
        self.embed_entities.len() - 1
    }

    /// Finds an embedded reference by UUID.
    pub fn embed_by_uuid(&self, uuid: Uuid) -> Option<&EmbeddedRef> {
        self.embed_entities.iter().find(|e| e.uuid == uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::AutoExport;
    use serde_json::json;

    #[test]
    fn fields_flatten_on_the_wire() {
        let uuid = Uuid::new_v4();
        let mut envelope = EntityEnvelope::new(uuid, 1, 2).with_title("Hello");
        envelope.set_field("body", json!({"value": "<p>text</p>", "format": "html"}));

        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["uuid"], json!(uuid.to_string()));
        assert_eq!(wire["title"], json!("Hello"));
        // Field values sit next to the fixed keys, not under a "fields" key.
        assert_eq!(wire["body"]["format"], json!("html"));
        assert!(wire.get("fields").is_none());
        assert!(wire.get("preview").is_none());
    }

    #[test]
    fn envelope_roundtrip() {
        let uuid = Uuid::new_v4();
        let mut envelope = EntityEnvelope::new(uuid, 100, 200)
            .with_id("42")
            .with_url("https://site-a.example.com/node/42");
        envelope.set_field("field_tags", json!(["news", "local"]));
        envelope.set_translation("de", "title", json!("Hallo"));
        envelope.push_embed(EmbeddedRef::new(
            "content",
            "file",
            "file",
            "v1",
            Uuid::new_v4(),
            AutoExport::ExportAsDependency,
        ));

        let text = serde_json::to_string(&envelope).unwrap();
        let back: EntityEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn embed_lookup_by_uuid() {
        let target = Uuid::new_v4();
        let mut envelope = EntityEnvelope::new(Uuid::new_v4(), 0, 0);
        envelope.push_embed(EmbeddedRef::new(
            "content",
            "node",
            "article",
            "v1",
            target,
            AutoExport::ResolveIfExists,
        ));

        assert!(envelope.embed_by_uuid(target).is_some());
        assert!(envelope.embed_by_uuid(Uuid::new_v4()).is_none());
    }
}
