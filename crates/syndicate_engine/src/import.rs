//! Import intents: applying an inbound envelope to the local store.

use crate::context::{EmbedEntry, SyncContext};
use crate::engine::SyncEngine;
use crate::entity::Entity;
use crate::error::{EngineError, EngineResult, IntentOutcome, SkipReason};
use crate::events::{SyncDirection, SyncEvent};
use crate::merge::{merge_ordered_references, MergeInput};
use crate::resolver::WaitingEntry;
use crate::serializer::{reference_descriptor, reference_targets, reference_uuids, ReferenceTarget};
use serde_json::Value;
use std::collections::BTreeMap;
use syndicate_config::{
    EntityTypeRule, ReasonFilter, SyncAction, SyncReason, UpdateBehavior,
};
use syndicate_protocol::{AutoExport, EntityEnvelope};
use syndicate_record::{
    EntityRef, FailureDetail, FailureKind, FlowFilter, FlowRef, MergeState, SyncRecord,
};

/// One inbound transfer as delivered by the broker.
#[derive(Debug, Clone, Copy)]
pub struct ImportRequest<'a> {
    /// The pool the transfer arrived from.
    pub pool_id: &'a str,
    /// Entity type of the payload.
    pub entity_type: &'a str,
    /// Bundle of the payload.
    pub bundle: &'a str,
    /// The wire envelope.
    pub envelope: &'a EntityEnvelope,
    /// Why the sender pushed the entity.
    pub reason: SyncReason,
    /// The action the sender requested.
    pub action: SyncAction,
    /// Schema version the sender serialized under, if it sent one.
    pub remote_version: Option<&'a str>,
}

impl SyncEngine {
    /// Runs one import intent.
    ///
    /// Matches a flow, reclassifies the action against the sync history,
    /// applies the payload to the local store, reconciles ordered reference
    /// lists, queues unresolved references and replays anything that waited
    /// for this entity.
    pub fn import_envelope(
        &self,
        ctx: &mut SyncContext,
        request: &ImportRequest<'_>,
    ) -> EngineResult<IntentOutcome> {
        let ImportRequest {
            pool_id,
            entity_type,
            bundle,
            envelope,
            reason,
            action,
            remote_version,
        } = *request;

        if self.config.pool(pool_id).is_none() {
            return Ok(IntentOutcome::Skipped(SkipReason::UnknownPool));
        }
        let entity_ref = EntityRef::new(entity_type, envelope.uuid);

        let Some(flow) =
            self.config
                .importing_flow(entity_type, bundle, ReasonFilter::Any, action, pool_id)
        else {
            // Keep an error-only record so operators can see the dropped
            // transfer; it is purged once a real import succeeds.
            let mut orphan = self
                .records
                .get_or_create(&entity_ref, FlowRef::NoFlow, pool_id)?;
            orphan.record_import_failure(FailureDetail::new(
                FailureKind::NoMatchingFlow,
                action,
                reason,
                format!("no flow imports {entity_type}/{bundle} from pool {pool_id}"),
            ));
            self.records.save(&orphan)?;
            return Ok(IntentOutcome::Skipped(SkipReason::NoMatchingFlow));
        };
        let flow_id = flow.id.clone();
        let Some(rule) = flow.rule(entity_type, bundle) else {
            return Ok(IntentOutcome::Skipped(SkipReason::NotConfigured));
        };

        let mut record =
            self.records
                .get_or_create(&entity_ref, FlowRef::Flow(flow_id.clone()), pool_id)?;

        // Reclassify against the sync history.
        let mut action = action;
        if record.was_imported() {
            if action == SyncAction::Create {
                action = SyncAction::Update;
            }
        } else if action == SyncAction::Update {
            action = SyncAction::Create;
        }

        // Manual flows require the first create to be user-driven; updates
        // of an already imported entity flow automatically.
        if !rule.import_mode.allows(reason, action) {
            return Ok(IntentOutcome::Skipped(SkipReason::ManualImportRequired));
        }

        if action == SyncAction::Update && rule.update_behavior == UpdateBehavior::IgnoreUpdates {
            record.record_import_failure(FailureDetail::new(
                FailureKind::IgnoreUpdates,
                action,
                reason,
                "flow ignores remote updates after the first import",
            ));
            self.records.save(&record)?;
            return Ok(IntentOutcome::Skipped(SkipReason::IgnoreUpdates));
        }

        ctx.mark_just_imported(entity_type, envelope.uuid);

        let current_version = self.schema_version_of(entity_type, bundle)?;
        if action == SyncAction::Update && remote_version.is_some_and(|v| v != current_version) {
            // The sender serialized under a drifted schema: re-create.
            action = SyncAction::Create;
        }

        if action.is_delete() {
            self.entities.delete(entity_type, envelope.uuid)?;
            record.mark_deleted();
            record.entity_type_version = current_version;
            record.data.failure = None;
            record.set_last_import(Some(self.now()));
            self.records.save(&record)?;
            self.events.notify(&SyncEvent {
                direction: SyncDirection::Import,
                entity: entity_ref,
                flow_id,
                pool_id: pool_id.to_string(),
                action,
                reason,
            });
            return Ok(IntentOutcome::Performed);
        }

        let existing = self.entities.load(entity_type, envelope.uuid)?;
        let mut entity = match &existing {
            Some(entity) => entity.clone(),
            None => Entity::new(entity_type, bundle, envelope.uuid)
                .with_timestamps(envelope.created, envelope.changed),
        };

        // When the flow merges local changes and the user flagged the
        // entity, plain remote values and the label are not applied; only
        // the ordered-reference merge below still reconciles.
        let overridden = action == SyncAction::Update
            && rule.update_behavior.merges_local_changes()
            && record.flags.local_edit_override
            && existing.is_some();

        if !overridden {
            entity.changed = envelope.changed;
            let Some(handler) = self.handler(rule) else {
                return Ok(IntentOutcome::Skipped(SkipReason::NotConfigured));
            };
            if !handler.deserialize(envelope, rule, &mut entity)? {
                record.record_import_failure(FailureDetail::new(
                    FailureKind::HandlerDenied,
                    action,
                    reason,
                    "handler vetoed the import",
                ));
                self.records.save(&record)?;
                return Ok(IntentOutcome::Skipped(SkipReason::HandlerIgnores));
            }
        }

        self.apply_references(
            ctx,
            request,
            rule,
            &mut record,
            existing.as_ref(),
            &mut entity,
            overridden,
        )?;

        self.entities.save(&entity)?;

        record.entity_type_version = current_version;
        record.data.failure = None;
        record.set_last_import(Some(self.now()));
        self.records.save(&record)?;

        tracing::debug!(
            entity = %entity.entity_ref(),
            flow = %flow_id,
            pool = pool_id,
            ?action,
            "imported"
        );
        self.events.notify(&SyncEvent {
            direction: SyncDirection::Import,
            entity: entity.entity_ref(),
            flow_id,
            pool_id: pool_id.to_string(),
            action,
            reason,
        });

        self.resolve_dependencies(&entity)?;
        Ok(IntentOutcome::Performed)
    }

    /// Resolves, merges and queues the entity reference fields of an import.
    #[allow(clippy::too_many_arguments)]
    fn apply_references(
        &self,
        ctx: &mut SyncContext,
        request: &ImportRequest<'_>,
        rule: &EntityTypeRule,
        record: &mut SyncRecord,
        existing: Option<&Entity>,
        entity: &mut Entity,
        overridden: bool,
    ) -> EngineResult<()> {
        let envelope = request.envelope;
        let definitions = self
            .entities
            .field_definitions(&entity.entity_type, &entity.bundle)?;

        for definition in definitions
            .iter()
            .filter(|d| d.is_entity_reference && rule.field_syncs(&d.name))
        {
            let Some(remote_value) = envelope.field(&definition.name).cloned() else {
                continue;
            };
            let targets = reference_targets(&remote_value);

            // Resolve every target, importing inline copies and queuing
            // what stays missing.
            for target in &targets {
                if self.entities.load(&target.entity_type, target.uuid)?.is_some() {
                    continue;
                }
                if self.import_inline_embed(ctx, request, target)? {
                    continue;
                }
                self.save_unresolved(
                    &EntityRef::new(target.entity_type.clone(), target.uuid),
                    WaitingEntry::new(entity.entity_type.clone(), envelope.uuid, request.reason)
                        .with_field(definition.name.clone()),
                )?;
            }

            let remote_ids: Vec<String> = targets.iter().map(|t| t.uuid.to_string()).collect();

            if definition.multiple && overridden {
                if let Some(state) = record.data.merge_state.get(&definition.name).cloned() {
                    let local_targets = existing
                        .and_then(|e| e.field(&definition.name))
                        .map(reference_targets)
                        .unwrap_or_default();
                    let local_ids: Vec<String> =
                        local_targets.iter().map(|t| t.uuid.to_string()).collect();
                    let overwrite_ids: Vec<String> = state
                        .last_overwrite_values
                        .iter()
                        .flat_map(reference_uuids)
                        .map(|uuid| uuid.to_string())
                        .collect();
                    let known: BTreeMap<String, ReferenceTarget> = targets
                        .iter()
                        .chain(local_targets.iter())
                        .map(|t| (t.uuid.to_string(), t.clone()))
                        .collect();

                    let merged = merge_ordered_references(
                        &MergeInput {
                            remote_order: &remote_ids,
                            previous_imported: &state.last_imported_values,
                            previous_overwrite: &overwrite_ids,
                            current_local: &local_ids,
                        },
                        |id| {
                            known.get(id).is_some_and(|t| {
                                self.entities
                                    .load(&t.entity_type, t.uuid)
                                    .ok()
                                    .flatten()
                                    .is_some()
                            })
                        },
                        |id| known.get(id).is_some_and(|t| self.is_locally_sourced(t)),
                    );

                    // The merge only writes when it changes the local list.
                    if let Some(merged_ids) = merged {
                        let value = Value::Array(
                            merged_ids
                                .iter()
                                .filter_map(|id| self.descriptor_for(id, &remote_value, &known))
                                .collect(),
                        );
                        entity.set_field(definition.name.clone(), value);
                    }
                }
            }

            if definition.multiple {
                // The next merge diffs against the raw remote order, not
                // against whatever the merge produced this time.
                record.data.merge_state.insert(
                    definition.name.clone(),
                    MergeState {
                        last_imported_values: remote_ids,
                        last_overwrite_values: match &remote_value {
                            Value::Array(items) => items.clone(),
                            other => vec![other.clone()],
                        },
                    },
                );
            }
        }
        Ok(())
    }

    /// Imports an inline embedded copy of a missing reference target.
    ///
    /// Returns true when the target is available afterwards. An inline copy
    /// serialized under a drifted schema is a hard error so the operator
    /// can tell it apart from a routine missing dependency.
    fn import_inline_embed(
        &self,
        ctx: &mut SyncContext,
        request: &ImportRequest<'_>,
        target: &ReferenceTarget,
    ) -> EngineResult<bool> {
        let Some(embed) = request.envelope.embed_by_uuid(target.uuid) else {
            return Ok(false);
        };
        if embed.auto_export != AutoExport::EmbedInline || embed.entity.is_none() {
            return Ok(false);
        }

        let local_version = self.schema_version_of(&embed.entity_type, &embed.bundle)?;
        let Some(inline) = embed.inline_entity(&local_version) else {
            return Err(EngineError::IncompatibleVersion {
                local: local_version,
                remote: embed.version.clone(),
            });
        };

        if ctx.enter_embed(&embed.entity_type, embed.uuid) != EmbedEntry::Entered {
            return Ok(false);
        }
        let result = self.import_envelope(
            ctx,
            &ImportRequest {
                pool_id: request.pool_id,
                entity_type: &embed.entity_type,
                bundle: &embed.bundle,
                envelope: inline,
                reason: SyncReason::AsDependency,
                action: SyncAction::Create,
                remote_version: Some(&embed.version),
            },
        );
        ctx.exit_embed();
        result?;

        Ok(self
            .entities
            .load(&target.entity_type, target.uuid)?
            .is_some())
    }

    /// An entity is locally sourced when a record marks this site as its
    /// authoritative source, or when no flow has ever imported it.
    fn is_locally_sourced(&self, target: &ReferenceTarget) -> bool {
        let entity_ref = EntityRef::new(target.entity_type.clone(), target.uuid);
        match self.records.find(&entity_ref, FlowFilter::Any, None) {
            Ok(records) => {
                records.iter().any(|r| r.flags.is_source_entity)
                    || !records.iter().any(|r| r.was_imported())
            }
            Err(_) => false,
        }
    }

    /// Picks the descriptor to store for a merged reference: the one the
    /// remote sent when available, otherwise one built from the local copy.
    fn descriptor_for(
        &self,
        id: &str,
        remote_value: &Value,
        known: &BTreeMap<String, ReferenceTarget>,
    ) -> Option<Value> {
        if let Value::Array(items) = remote_value {
            if let Some(item) = items
                .iter()
                .find(|v| v.get("uuid").and_then(Value::as_str) == Some(id))
            {
                return Some(item.clone());
            }
        }
        let target = known.get(id)?;
        self.entities
            .load(&target.entity_type, target.uuid)
            .ok()
            .flatten()
            .map(|entity| reference_descriptor(&entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityStore, FieldDescriptor, MemoryEntityStore};
    use crate::events::MemorySink;
    use crate::resolver::{DependencyStore, MemoryDependencyStore};
    use crate::transport::{Method, MockBroker};
    use serde_json::json;
    use std::sync::Arc;
    use syndicate_config::{
        EntityTypeRule, ExportMode, Flow, ImportMode, Pool, PoolAssignment, SiteConfig, TypeBundle,
    };
    use syndicate_record::{MemoryRecordStore, RecordStore};
    use uuid::Uuid;

    struct Harness {
        engine: SyncEngine,
        records: Arc<MemoryRecordStore>,
        entities: Arc<MemoryEntityStore>,
        broker: Arc<MockBroker>,
        dependencies: Arc<MemoryDependencyStore>,
        events: Arc<MemorySink>,
    }

    fn harness_with(update_behavior: UpdateBehavior, import_mode: ImportMode) -> Harness {
        let article = EntityTypeRule::new("default", "v1")
            .with_export_mode(ExportMode::Automatic)
            .with_import_mode(import_mode)
            .with_export_pool("main", PoolAssignment::Force)
            .with_import_pool("main", PoolAssignment::Allow)
            .with_update_behavior(update_behavior);
        let image = EntityTypeRule::new("default", "v1")
            .with_import_mode(ImportMode::AsDependency)
            .with_import_pool("main", PoolAssignment::Allow);
        let paragraph = EntityTypeRule::new("default", "v1")
            .with_import_mode(ImportMode::AsDependency)
            .with_import_pool("main", PoolAssignment::Allow);
        let config = SiteConfig::new()
            .with_flow(
                Flow::new("content", "Content")
                    .with_rule(TypeBundle::new("node", "article"), article)
                    .with_rule(TypeBundle::new("file", "image"), image)
                    .with_rule(TypeBundle::new("paragraph", "text"), paragraph),
            )
            .with_pool(Pool::new("main", "https://broker.example.com/api", "site-b"));

        let records = Arc::new(MemoryRecordStore::new());
        let entities = Arc::new(MemoryEntityStore::new());
        entities.define_fields(
            "node",
            "article",
            vec![
                FieldDescriptor::new("body"),
                FieldDescriptor::reference("field_image"),
                FieldDescriptor::reference("field_paragraphs").with_multiple(),
            ],
        );
        entities.define_fields("file", "image", vec![FieldDescriptor::new("uri")]);
        entities.define_fields("paragraph", "text", vec![FieldDescriptor::new("text")]);
        let broker = Arc::new(MockBroker::new());
        let dependencies = Arc::new(MemoryDependencyStore::new());
        let events = Arc::new(MemorySink::new());
        let engine = SyncEngine::new(
            config,
            Arc::clone(&records) as _,
            Arc::clone(&entities) as _,
            Arc::clone(&broker) as _,
        )
        .with_dependency_store(Arc::clone(&dependencies) as _)
        .with_event_sink(Arc::clone(&events) as _);
        Harness {
            engine,
            records,
            entities,
            broker,
            dependencies,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(UpdateBehavior::ForceOverwrite, ImportMode::Automatic)
    }

    fn envelope(uuid: Uuid) -> EntityEnvelope {
        let mut envelope = EntityEnvelope::new(uuid, 100, 200).with_title("Hello");
        envelope.set_field("body", json!("remote text"));
        envelope
    }

    fn import(
        h: &Harness,
        ctx: &mut SyncContext,
        envelope: &EntityEnvelope,
        reason: SyncReason,
        action: SyncAction,
    ) -> EngineResult<IntentOutcome> {
        h.engine.import_envelope(
            ctx,
            &ImportRequest {
                pool_id: "main",
                entity_type: "node",
                bundle: "article",
                envelope,
                reason,
                action,
                remote_version: None,
            },
        )
    }

    #[test]
    fn first_import_creates_the_entity() {
        let h = harness();
        let uuid = Uuid::new_v4();
        let mut ctx = SyncContext::new();

        let outcome = import(
            &h,
            &mut ctx,
            &envelope(uuid),
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();
        assert_eq!(outcome, IntentOutcome::Performed);

        let entity = h.entities.load("node", uuid).unwrap().unwrap();
        assert_eq!(entity.label.as_deref(), Some("Hello"));
        assert_eq!(entity.field("body"), Some(&json!("remote text")));

        let record = h
            .records
            .get(
                &EntityRef::new("node", uuid),
                &FlowRef::Flow("content".into()),
                "main",
            )
            .unwrap()
            .unwrap();
        assert!(record.was_imported());
        assert_eq!(
            record.entity_type_version,
            h.engine.schema_version_of("node", "article").unwrap()
        );
        assert_eq!(h.events.count_of(SyncDirection::Import), 1);
        assert!(ctx.was_just_imported("node", uuid));
    }

    #[test]
    fn unknown_pool_is_skipped() {
        let h = harness();
        let mut ctx = SyncContext::new();
        let outcome = h
            .engine
            .import_envelope(
                &mut ctx,
                &ImportRequest {
                    pool_id: "missing",
                    entity_type: "node",
                    bundle: "article",
                    envelope: &envelope(Uuid::new_v4()),
                    reason: SyncReason::Automatic,
                    action: SyncAction::Create,
                    remote_version: None,
                },
            )
            .unwrap();
        assert_eq!(outcome, IntentOutcome::Skipped(SkipReason::UnknownPool));
        assert!(h.records.is_empty());
    }

    #[test]
    fn unmatched_transfer_leaves_an_orphan_record() {
        let h = harness();
        let uuid = Uuid::new_v4();
        let mut ctx = SyncContext::new();

        let outcome = h
            .engine
            .import_envelope(
                &mut ctx,
                &ImportRequest {
                    pool_id: "main",
                    entity_type: "block",
                    bundle: "banner",
                    envelope: &envelope(uuid),
                    reason: SyncReason::Automatic,
                    action: SyncAction::Create,
                    remote_version: None,
                },
            )
            .unwrap();
        assert_eq!(outcome, IntentOutcome::Skipped(SkipReason::NoMatchingFlow));

        let orphans = h
            .records
            .find(&EntityRef::new("block", uuid), FlowFilter::Orphaned, None)
            .unwrap();
        assert_eq!(orphans.len(), 1);
        assert!(orphans[0].flags.import_failed_soft);
        assert_eq!(
            orphans[0].data.failure.as_ref().map(|f| f.kind),
            Some(FailureKind::NoMatchingFlow)
        );
    }

    #[test]
    fn manual_flow_gates_the_first_create() {
        let h = harness_with(UpdateBehavior::ForceOverwrite, ImportMode::Manual);
        let uuid = Uuid::new_v4();

        let mut ctx = SyncContext::new();
        let outcome = import(
            &h,
            &mut ctx,
            &envelope(uuid),
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();
        assert_eq!(
            outcome,
            IntentOutcome::Skipped(SkipReason::ManualImportRequired)
        );
        assert!(h.entities.load("node", uuid).unwrap().is_none());

        // The user pulls it in manually once.
        let mut ctx = SyncContext::new();
        let outcome = import(
            &h,
            &mut ctx,
            &envelope(uuid),
            SyncReason::Manual,
            SyncAction::Create,
        )
        .unwrap();
        assert_eq!(outcome, IntentOutcome::Performed);

        // From then on automatic updates flow.
        let mut updated = envelope(uuid);
        updated.set_field("body", json!("newer"));
        let mut ctx = SyncContext::new();
        let outcome = import(
            &h,
            &mut ctx,
            &updated,
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();
        assert_eq!(outcome, IntentOutcome::Performed);
        let entity = h.entities.load("node", uuid).unwrap().unwrap();
        assert_eq!(entity.field("body"), Some(&json!("newer")));
    }

    #[test]
    fn ignore_updates_after_first_import() {
        let h = harness_with(UpdateBehavior::IgnoreUpdates, ImportMode::Automatic);
        let uuid = Uuid::new_v4();

        let mut ctx = SyncContext::new();
        import(
            &h,
            &mut ctx,
            &envelope(uuid),
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();

        let mut updated = envelope(uuid);
        updated.set_field("body", json!("newer"));
        let mut ctx = SyncContext::new();
        let outcome = import(
            &h,
            &mut ctx,
            &updated,
            SyncReason::Automatic,
            SyncAction::Update,
        )
        .unwrap();
        assert_eq!(outcome, IntentOutcome::Skipped(SkipReason::IgnoreUpdates));

        let entity = h.entities.load("node", uuid).unwrap().unwrap();
        assert_eq!(entity.field("body"), Some(&json!("remote text")));

        let record = h
            .records
            .get(
                &EntityRef::new("node", uuid),
                &FlowRef::Flow("content".into()),
                "main",
            )
            .unwrap()
            .unwrap();
        assert!(record.flags.import_failed_soft);
    }

    #[test]
    fn remote_delete_removes_the_entity() {
        let h = harness();
        let uuid = Uuid::new_v4();

        let mut ctx = SyncContext::new();
        import(
            &h,
            &mut ctx,
            &envelope(uuid),
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();
        assert!(h.entities.contains("node", uuid));

        let mut ctx = SyncContext::new();
        let outcome = import(
            &h,
            &mut ctx,
            &envelope(uuid),
            SyncReason::Automatic,
            SyncAction::Delete,
        )
        .unwrap();
        assert_eq!(outcome, IntentOutcome::Performed);
        assert!(!h.entities.contains("node", uuid));

        let record = h
            .records
            .get(
                &EntityRef::new("node", uuid),
                &FlowRef::Flow("content".into()),
                "main",
            )
            .unwrap()
            .unwrap();
        assert!(record.flags.deleted);
        assert!(record.was_imported());
    }

    #[test]
    fn successful_import_purges_the_orphan() {
        let h = harness();
        let uuid = Uuid::new_v4();
        let entity_ref = EntityRef::new("node", uuid);
        h.records
            .get_or_create(&entity_ref, FlowRef::NoFlow, "main")
            .unwrap();

        let mut ctx = SyncContext::new();
        import(
            &h,
            &mut ctx,
            &envelope(uuid),
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();

        let orphans = h
            .records
            .find(&entity_ref, FlowFilter::Orphaned, None)
            .unwrap();
        assert!(orphans.is_empty());
    }

    #[test]
    fn missing_reference_is_queued_and_fixed_up_later() {
        let h = harness();
        let node_uuid = Uuid::new_v4();
        let image_uuid = Uuid::new_v4();

        let mut payload = envelope(node_uuid);
        payload.set_field(
            "field_image",
            json!({"uuid": image_uuid.to_string(), "type": "file", "bundle": "image"}),
        );

        let mut ctx = SyncContext::new();
        let outcome = import(
            &h,
            &mut ctx,
            &payload,
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();
        assert_eq!(outcome, IntentOutcome::Performed);

        let awaited = EntityRef::new("file", image_uuid);
        let waiting = h.dependencies.load(&awaited).unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].uuid, node_uuid);
        assert_eq!(waiting[0].field.as_deref(), Some("field_image"));

        // The image arrives as a dependency; the node's scalar reference is
        // fixed up in place and the waiting list drains.
        let mut image_envelope = EntityEnvelope::new(image_uuid, 1, 2);
        image_envelope.set_field("uri", json!("public://cat.jpg"));
        let mut ctx = SyncContext::new();
        let outcome = h
            .engine
            .import_envelope(
                &mut ctx,
                &ImportRequest {
                    pool_id: "main",
                    entity_type: "file",
                    bundle: "image",
                    envelope: &image_envelope,
                    reason: SyncReason::AsDependency,
                    action: SyncAction::Create,
                    remote_version: None,
                },
            )
            .unwrap();
        assert_eq!(outcome, IntentOutcome::Performed);

        let node = h.entities.load("node", node_uuid).unwrap().unwrap();
        let fixed = node.field("field_image").unwrap();
        assert_eq!(fixed["uuid"], json!(image_uuid.to_string()));
        assert!(h.dependencies.load(&awaited).unwrap().is_empty());
    }

    #[test]
    fn duplicate_waiting_entries_are_not_queued() {
        let h = harness();
        let node_uuid = Uuid::new_v4();
        let image_uuid = Uuid::new_v4();

        let mut payload = envelope(node_uuid);
        payload.set_field(
            "field_image",
            json!({"uuid": image_uuid.to_string(), "type": "file", "bundle": "image"}),
        );

        for _ in 0..2 {
            let mut ctx = SyncContext::new();
            import(
                &h,
                &mut ctx,
                &payload,
                SyncReason::Automatic,
                SyncAction::Create,
            )
            .unwrap();
        }

        let waiting = h
            .dependencies
            .load(&EntityRef::new("file", image_uuid))
            .unwrap();
        assert_eq!(waiting.len(), 1);
    }

    #[test]
    fn multi_valued_wait_requests_a_resync() {
        let h = harness();
        let node_uuid = Uuid::new_v4();
        let p1 = Uuid::new_v4();

        let mut payload = envelope(node_uuid);
        payload.set_field(
            "field_paragraphs",
            json!([{"uuid": p1.to_string(), "type": "paragraph", "bundle": "text"}]),
        );

        let mut ctx = SyncContext::new();
        import(
            &h,
            &mut ctx,
            &payload,
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();
        assert_eq!(h.broker.request_count(), 0);

        // The paragraph arrives; ordering cannot be patched in place, so the
        // node is resynced through the regular import path.
        let mut paragraph = EntityEnvelope::new(p1, 1, 2);
        paragraph.set_field("text", json!("hello"));
        let mut ctx = SyncContext::new();
        h.engine
            .import_envelope(
                &mut ctx,
                &ImportRequest {
                    pool_id: "main",
                    entity_type: "paragraph",
                    bundle: "text",
                    envelope: &paragraph,
                    reason: SyncReason::AsDependency,
                    action: SyncAction::Create,
                    remote_version: None,
                },
            )
            .unwrap();

        let requests = h.broker.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Post);
        assert!(requests[0].url.contains(&node_uuid.to_string()));
        assert_eq!(
            requests[0].body.as_ref().unwrap()["action"],
            json!("request_sync")
        );
        assert_eq!(requests[0].body.as_ref().unwrap()["reason"], json!("automatic"));
    }

    #[test]
    fn inline_embedded_dependency_imports_first() {
        let h = harness();
        let node_uuid = Uuid::new_v4();
        let image_uuid = Uuid::new_v4();

        let mut image_envelope = EntityEnvelope::new(image_uuid, 1, 2);
        image_envelope.set_field("uri", json!("public://cat.jpg"));
        let image_version = h.engine.schema_version_of("file", "image").unwrap();

        let mut payload = envelope(node_uuid);
        payload.set_field(
            "field_image",
            json!({"uuid": image_uuid.to_string(), "type": "file", "bundle": "image"}),
        );
        payload.push_embed(
            syndicate_protocol::EmbeddedRef::new(
                "main",
                "file",
                "image",
                image_version,
                image_uuid,
                AutoExport::EmbedInline,
            )
            .with_inline(image_envelope),
        );

        let mut ctx = SyncContext::new();
        let outcome = import(
            &h,
            &mut ctx,
            &payload,
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();
        assert_eq!(outcome, IntentOutcome::Performed);

        let image = h.entities.load("file", image_uuid).unwrap().unwrap();
        assert_eq!(image.field("uri"), Some(&json!("public://cat.jpg")));
        // Nothing left waiting.
        assert!(h.dependencies.is_empty());
        // Both imports were marked in the unit of work.
        assert!(ctx.was_just_imported("file", image_uuid));
    }

    #[test]
    fn drifted_inline_embed_is_a_hard_error() {
        let h = harness();
        let node_uuid = Uuid::new_v4();
        let image_uuid = Uuid::new_v4();

        let mut payload = envelope(node_uuid);
        payload.set_field(
            "field_image",
            json!({"uuid": image_uuid.to_string(), "type": "file", "bundle": "image"}),
        );
        payload.push_embed(
            syndicate_protocol::EmbeddedRef::new(
                "main",
                "file",
                "image",
                "stale-version",
                image_uuid,
                AutoExport::EmbedInline,
            )
            .with_inline(EntityEnvelope::new(image_uuid, 1, 2)),
        );

        let mut ctx = SyncContext::new();
        let result = import(
            &h,
            &mut ctx,
            &payload,
            SyncReason::Automatic,
            SyncAction::Create,
        );
        assert!(matches!(
            result,
            Err(EngineError::IncompatibleVersion { .. })
        ));
    }

    #[test]
    fn local_list_edits_survive_a_remote_update() {
        let h = harness_with(UpdateBehavior::AllowLocalOverride, ImportMode::Automatic);
        let node_uuid = Uuid::new_v4();
        let paragraphs: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for (index, uuid) in paragraphs.iter().enumerate() {
            let mut paragraph = Entity::new("paragraph", "text", *uuid).with_timestamps(1, 2);
            paragraph.set_field("text", json!(format!("paragraph {index}")));
            h.entities.insert(paragraph);
        }
        let descriptor = |uuid: &Uuid| {
            json!({"uuid": uuid.to_string(), "type": "paragraph", "bundle": "text"})
        };

        // First import writes paragraphs 0..3.
        let mut payload = envelope(node_uuid);
        payload.set_field(
            "field_paragraphs",
            json!([
                descriptor(&paragraphs[0]),
                descriptor(&paragraphs[1]),
                descriptor(&paragraphs[2]),
            ]),
        );
        let mut ctx = SyncContext::new();
        import(
            &h,
            &mut ctx,
            &payload,
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();

        let entity_ref = EntityRef::new("node", node_uuid);
        let mut record = h
            .records
            .get(&entity_ref, &FlowRef::Flow("content".into()), "main")
            .unwrap()
            .unwrap();
        let state = record.data.merge_state.get("field_paragraphs").unwrap();
        assert_eq!(
            state.last_imported_values,
            vec![
                paragraphs[0].to_string(),
                paragraphs[1].to_string(),
                paragraphs[2].to_string()
            ]
        );

        // A local editor removes the middle paragraph.
        let mut node = h.entities.load("node", node_uuid).unwrap().unwrap();
        node.set_field(
            "field_paragraphs",
            json!([descriptor(&paragraphs[0]), descriptor(&paragraphs[2])]),
        );
        h.entities.insert(node);
        record.flags.local_edit_override = true;
        h.records.save(&record).unwrap();

        // The remote appends a fourth paragraph and re-sends all four.
        let mut updated = envelope(node_uuid);
        updated.changed = 300;
        updated.set_field(
            "field_paragraphs",
            json!([
                descriptor(&paragraphs[0]),
                descriptor(&paragraphs[1]),
                descriptor(&paragraphs[2]),
                descriptor(&paragraphs[3]),
            ]),
        );
        let mut ctx = SyncContext::new();
        let outcome = import(
            &h,
            &mut ctx,
            &updated,
            SyncReason::Automatic,
            SyncAction::Update,
        )
        .unwrap();
        assert_eq!(outcome, IntentOutcome::Performed);

        // The local removal holds; the new paragraph lands after its kept
        // predecessor.
        let node = h.entities.load("node", node_uuid).unwrap().unwrap();
        let merged = node.field("field_paragraphs").unwrap();
        let merged_ids: Vec<String> = reference_uuids(merged)
            .iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(
            merged_ids,
            vec![
                paragraphs[0].to_string(),
                paragraphs[2].to_string(),
                paragraphs[3].to_string()
            ]
        );

        let record = h
            .records
            .get(&entity_ref, &FlowRef::Flow("content".into()), "main")
            .unwrap()
            .unwrap();
        let state = record.data.merge_state.get("field_paragraphs").unwrap();
        let remote_ids: Vec<String> = paragraphs.iter().map(|u| u.to_string()).collect();
        assert_eq!(state.last_imported_values, remote_ids);
        assert_eq!(state.last_overwrite_values.len(), 4);
    }

    #[test]
    fn force_overwrite_replaces_local_list_edits() {
        let h = harness();
        let node_uuid = Uuid::new_v4();
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        for uuid in [p1, p2] {
            h.entities
                .insert(Entity::new("paragraph", "text", uuid).with_timestamps(1, 2));
        }
        let descriptor = |uuid: &Uuid| {
            json!({"uuid": uuid.to_string(), "type": "paragraph", "bundle": "text"})
        };

        let mut payload = envelope(node_uuid);
        payload.set_field("field_paragraphs", json!([descriptor(&p1)]));
        let mut ctx = SyncContext::new();
        import(
            &h,
            &mut ctx,
            &payload,
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();

        // Local edits, but the flow overwrites on update.
        let mut node = h.entities.load("node", node_uuid).unwrap().unwrap();
        node.set_field("field_paragraphs", json!([descriptor(&p2)]));
        h.entities.insert(node);

        let mut updated = envelope(node_uuid);
        updated.changed = 300;
        updated.set_field("field_paragraphs", json!([descriptor(&p1)]));
        let mut ctx = SyncContext::new();
        import(
            &h,
            &mut ctx,
            &updated,
            SyncReason::Automatic,
            SyncAction::Update,
        )
        .unwrap();

        let node = h.entities.load("node", node_uuid).unwrap().unwrap();
        assert_eq!(reference_uuids(node.field("field_paragraphs").unwrap()), vec![p1]);
    }

    #[test]
    fn plain_fields_keep_local_edits_under_override() {
        let h = harness_with(UpdateBehavior::AllowLocalOverride, ImportMode::Automatic);
        let uuid = Uuid::new_v4();
        let mut ctx = SyncContext::new();
        import(
            &h,
            &mut ctx,
            &envelope(uuid),
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();

        // A local editor rewrites the body and the title, then pins the
        // entity against remote overwrites.
        let mut node = h.entities.load("node", uuid).unwrap().unwrap();
        node.set_field("body", json!("local edit"));
        node.label = Some("Local title".into());
        h.entities.insert(node);
        let entity_ref = EntityRef::new("node", uuid);
        let mut record = h
            .records
            .get(&entity_ref, &FlowRef::Flow("content".into()), "main")
            .unwrap()
            .unwrap();
        record.flags.local_edit_override = true;
        h.records.save(&record).unwrap();

        let mut updated = envelope(uuid);
        updated.changed = 300;
        updated.set_field("body", json!("remote text v2"));
        let mut ctx = SyncContext::new();
        let outcome = import(
            &h,
            &mut ctx,
            &updated,
            SyncReason::Automatic,
            SyncAction::Update,
        )
        .unwrap();
        assert_eq!(outcome, IntentOutcome::Performed);

        let node = h.entities.load("node", uuid).unwrap().unwrap();
        assert_eq!(node.field("body"), Some(&json!("local edit")));
        assert_eq!(node.label.as_deref(), Some("Local title"));

        // Bookkeeping still advances.
        let record = h
            .records
            .get(&entity_ref, &FlowRef::Flow("content".into()), "main")
            .unwrap()
            .unwrap();
        assert!(record.was_imported());
        assert!(record.data.failure.is_none());
    }

    #[test]
    fn locally_added_entry_survives_repeated_syncs() {
        let h = harness_with(UpdateBehavior::AllowLocalOverride, ImportMode::Automatic);
        let node_uuid = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let x = Uuid::new_v4();
        for uuid in [a, b] {
            h.entities
                .insert(Entity::new("paragraph", "text", uuid).with_timestamps(1, 2));
        }
        let descriptor = |uuid: &Uuid| {
            json!({"uuid": uuid.to_string(), "type": "paragraph", "bundle": "text"})
        };

        // The appended paragraph was itself imported earlier, so its record
        // history says "imported"; only the merge bookkeeping keeps it alive.
        let mut x_envelope = EntityEnvelope::new(x, 1, 2);
        x_envelope.set_field("text", json!("appended by hand"));
        let mut ctx = SyncContext::new();
        h.engine
            .import_envelope(
                &mut ctx,
                &ImportRequest {
                    pool_id: "main",
                    entity_type: "paragraph",
                    bundle: "text",
                    envelope: &x_envelope,
                    reason: SyncReason::AsDependency,
                    action: SyncAction::Create,
                    remote_version: None,
                },
            )
            .unwrap();

        let mut payload = envelope(node_uuid);
        payload.set_field(
            "field_paragraphs",
            json!([descriptor(&a), descriptor(&b)]),
        );
        let mut ctx = SyncContext::new();
        import(
            &h,
            &mut ctx,
            &payload,
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();

        let mut node = h.entities.load("node", node_uuid).unwrap().unwrap();
        node.set_field(
            "field_paragraphs",
            json!([descriptor(&a), descriptor(&b), descriptor(&x)]),
        );
        h.entities.insert(node);
        let entity_ref = EntityRef::new("node", node_uuid);
        let mut record = h
            .records
            .get(&entity_ref, &FlowRef::Flow("content".into()), "main")
            .unwrap()
            .unwrap();
        record.flags.local_edit_override = true;
        h.records.save(&record).unwrap();

        // The remote re-sends the unchanged list twice; the local addition
        // must survive both rounds.
        for changed in [300, 400] {
            let mut updated = envelope(node_uuid);
            updated.changed = changed;
            updated.set_field(
                "field_paragraphs",
                json!([descriptor(&a), descriptor(&b)]),
            );
            let mut ctx = SyncContext::new();
            import(
                &h,
                &mut ctx,
                &updated,
                SyncReason::Automatic,
                SyncAction::Update,
            )
            .unwrap();

            let node = h.entities.load("node", node_uuid).unwrap().unwrap();
            assert_eq!(
                reference_uuids(node.field("field_paragraphs").unwrap()),
                vec![a, b, x]
            );
        }

        let record = h
            .records
            .get(&entity_ref, &FlowRef::Flow("content".into()), "main")
            .unwrap()
            .unwrap();
        let state = record.data.merge_state.get("field_paragraphs").unwrap();
        assert_eq!(
            state.last_imported_values,
            vec![a.to_string(), b.to_string()]
        );
    }

    #[test]
    fn source_copy_survives_remote_removal() {
        let h = harness_with(UpdateBehavior::AllowLocalOverride, ImportMode::Automatic);
        let node_uuid = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        h.entities
            .insert(Entity::new("paragraph", "text", a).with_timestamps(1, 2));
        let descriptor = |uuid: &Uuid| {
            json!({"uuid": uuid.to_string(), "type": "paragraph", "bundle": "text"})
        };

        // B was imported once, but this site owns the authoritative copy.
        let mut b_envelope = EntityEnvelope::new(b, 1, 2);
        b_envelope.set_field("text", json!("owned here"));
        let mut ctx = SyncContext::new();
        h.engine
            .import_envelope(
                &mut ctx,
                &ImportRequest {
                    pool_id: "main",
                    entity_type: "paragraph",
                    bundle: "text",
                    envelope: &b_envelope,
                    reason: SyncReason::AsDependency,
                    action: SyncAction::Create,
                    remote_version: None,
                },
            )
            .unwrap();
        let b_ref = EntityRef::new("paragraph", b);
        let mut b_record = h
            .records
            .get(&b_ref, &FlowRef::Flow("content".into()), "main")
            .unwrap()
            .unwrap();
        b_record.flags.is_source_entity = true;
        h.records.save(&b_record).unwrap();

        let mut payload = envelope(node_uuid);
        payload.set_field(
            "field_paragraphs",
            json!([descriptor(&a), descriptor(&b)]),
        );
        let mut ctx = SyncContext::new();
        import(
            &h,
            &mut ctx,
            &payload,
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();

        let entity_ref = EntityRef::new("node", node_uuid);
        let mut record = h
            .records
            .get(&entity_ref, &FlowRef::Flow("content".into()), "main")
            .unwrap()
            .unwrap();
        record.flags.local_edit_override = true;
        h.records.save(&record).unwrap();

        // The remote drops B; the source copy stays in place.
        let mut updated = envelope(node_uuid);
        updated.changed = 300;
        updated.set_field("field_paragraphs", json!([descriptor(&a)]));
        let mut ctx = SyncContext::new();
        import(
            &h,
            &mut ctx,
            &updated,
            SyncReason::Automatic,
            SyncAction::Update,
        )
        .unwrap();

        let node = h.entities.load("node", node_uuid).unwrap().unwrap();
        assert_eq!(
            reference_uuids(node.field("field_paragraphs").unwrap()),
            vec![a, b]
        );
    }

    #[test]
    fn replay_skips_entities_whose_flow_no_longer_imports() {
        let h = harness();
        let node_uuid = Uuid::new_v4();
        let image_uuid = Uuid::new_v4();

        let mut payload = envelope(node_uuid);
        payload.set_field(
            "field_image",
            json!({
                "uuid": image_uuid.to_string(),
                "type": "file",
                "bundle": "image",
                "label": "remote"
            }),
        );
        let mut ctx = SyncContext::new();
        import(
            &h,
            &mut ctx,
            &payload,
            SyncReason::Automatic,
            SyncAction::Create,
        )
        .unwrap();
        assert_eq!(h.dependencies.len(), 1);

        // Articles stop importing before the image arrives.
        let article = EntityTypeRule::new("default", "v1")
            .with_import_mode(ImportMode::Disabled)
            .with_import_pool("main", PoolAssignment::Allow);
        let image_rule = EntityTypeRule::new("default", "v1")
            .with_import_mode(ImportMode::AsDependency)
            .with_import_pool("main", PoolAssignment::Allow);
        let config = SiteConfig::new()
            .with_flow(
                Flow::new("content", "Content")
                    .with_rule(TypeBundle::new("node", "article"), article)
                    .with_rule(TypeBundle::new("file", "image"), image_rule),
            )
            .with_pool(Pool::new("main", "https://broker.example.com/api", "site-b"));
        let engine = SyncEngine::new(
            config,
            Arc::clone(&h.records) as _,
            Arc::clone(&h.entities) as _,
            Arc::clone(&h.broker) as _,
        )
        .with_dependency_store(Arc::clone(&h.dependencies) as _);

        let mut image_envelope = EntityEnvelope::new(image_uuid, 1, 2);
        image_envelope.set_field("uri", json!("public://cat.jpg"));
        let mut ctx = SyncContext::new();
        engine
            .import_envelope(
                &mut ctx,
                &ImportRequest {
                    pool_id: "main",
                    entity_type: "file",
                    bundle: "image",
                    envelope: &image_envelope,
                    reason: SyncReason::AsDependency,
                    action: SyncAction::Create,
                    remote_version: None,
                },
            )
            .unwrap();

        // The fix-up was skipped: the descriptor the remote sent is still
        // there, and the waiting list drained anyway.
        let node = h.entities.load("node", node_uuid).unwrap().unwrap();
        assert_eq!(node.field("field_image").unwrap()["label"], json!("remote"));
        assert!(h.dependencies.is_empty());
    }
}
