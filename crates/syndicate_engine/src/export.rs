//! Export intents: one directed transfer of one entity to one pool.

use crate::context::{EmbedEntry, SyncContext};
use crate::engine::SyncEngine;
use crate::entity::Entity;
use crate::error::{EngineError, EngineResult, IntentOutcome, SkipReason};
use crate::events::{SyncDirection, SyncEvent};
use crate::serializer::reference_targets;
use crate::transport::{entity_endpoint, Method};
use syndicate_config::{Pool, PoolAssignment, SyncAction, SyncReason};
use syndicate_protocol::{connection_id, AutoExport, EmbeddedRef, EntityEnvelope};
use syndicate_record::{FailureDetail, FailureKind, FlowRef, SyncRecord};

/// Outcome of one export intent within [`SyncEngine::export_entity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentReport {
    /// The flow the intent ran under.
    pub flow_id: String,
    /// The pool addressed.
    pub pool_id: String,
    /// What happened.
    pub outcome: IntentOutcome,
}

impl SyncEngine {
    /// Exports an entity to every applicable (flow, pool) pair.
    ///
    /// Forced pools always take part; allowed pools take part when the
    /// record says the user (or a dependency export) enabled them.
    pub fn export_entity(
        &self,
        ctx: &mut SyncContext,
        entity: &Entity,
        reason: SyncReason,
        action: SyncAction,
    ) -> EngineResult<Vec<IntentReport>> {
        let mut reports = Vec::new();
        for flow in self.config.flows() {
            let Some(rule) = flow.rule(&entity.entity_type, &entity.bundle) else {
                continue;
            };
            if rule.handler.is_none() {
                continue;
            }
            for (pool_id, assignment) in &rule.export_pools {
                let used = match assignment {
                    PoolAssignment::Force => true,
                    PoolAssignment::Forbid => false,
                    PoolAssignment::Allow => {
                        let existing = self.records.get(
                            &entity.entity_ref(),
                            &FlowRef::Flow(flow.id.clone()),
                            pool_id,
                        )?;
                        existing.is_some_and(|r| {
                            r.flags.export_enabled
                                || r.flags.user_allowed_export
                                || (reason == SyncReason::AsDependency
                                    && r.flags.dependency_export_enabled)
                        })
                    }
                };
                if !used {
                    continue;
                }
                let outcome = self.export_intent(ctx, entity, &flow.id, pool_id, reason, action)?;
                reports.push(IntentReport {
                    flow_id: flow.id.clone(),
                    pool_id: pool_id.clone(),
                    outcome,
                });
            }
        }
        Ok(reports)
    }

    /// Runs one export intent: serialize, embed dependencies, transmit and
    /// update the sync record.
    pub fn export_intent(
        &self,
        ctx: &mut SyncContext,
        entity: &Entity,
        flow_id: &str,
        pool_id: &str,
        reason: SyncReason,
        action: SyncAction,
    ) -> EngineResult<IntentOutcome> {
        let Some(flow) = self.config.flow(flow_id) else {
            return Ok(IntentOutcome::Skipped(SkipReason::NotConfigured));
        };
        let Some(pool) = self.config.pool(pool_id) else {
            return Ok(IntentOutcome::Skipped(SkipReason::UnknownPool));
        };
        if !flow.can_export(
            &entity.entity_type,
            &entity.bundle,
            reason,
            action,
            Some(pool_id),
        ) {
            return Ok(IntentOutcome::Skipped(SkipReason::NotConfigured));
        }
        let Some(rule) = flow.rule(&entity.entity_type, &entity.bundle) else {
            return Ok(IntentOutcome::Skipped(SkipReason::NotConfigured));
        };

        let mut record = self.records.get_or_create(
            &entity.entity_ref(),
            FlowRef::Flow(flow.id.clone()),
            pool_id,
        )?;

        // Reclassify against the sync history before anything else.
        let mut action = action;
        if record.was_exported() {
            if action == SyncAction::Create {
                action = SyncAction::Update;
            }
        } else {
            match action {
                SyncAction::Delete => {
                    record.record_export_failure(FailureDetail::new(
                        FailureKind::NeverExported,
                        action,
                        reason,
                        "delete of an entity never exported to this pool",
                    ));
                    self.records.save(&record)?;
                    return Ok(IntentOutcome::Skipped(SkipReason::NeverExported));
                }
                SyncAction::Update => action = SyncAction::Create,
                SyncAction::Create => {}
            }
        }

        if ctx.was_just_imported(&entity.entity_type, entity.uuid)
            && reason != SyncReason::Forced
        {
            record.record_export_failure(FailureDetail::new(
                FailureKind::JustImported,
                action,
                reason,
                "export echo of an import in the same unit of work",
            ));
            self.records.save(&record)?;
            return Ok(IntentOutcome::Skipped(SkipReason::JustImported));
        }

        let current_version = self.schema_version_of(&entity.entity_type, &entity.bundle)?;

        if action != SyncAction::Delete
            && !rule.unreliable_changed_timestamp
            && record.last_export_at().is_some_and(|at| entity.changed <= at)
            && record.entity_type_version == current_version
        {
            record.record_export_failure(FailureDetail::new(
                FailureKind::Unchanged,
                action,
                reason,
                "unchanged since the last export",
            ));
            self.records.save(&record)?;
            return Ok(IntentOutcome::Skipped(SkipReason::Unchanged));
        }

        if let Some(cached) = ctx.cached_outcome(
            &entity.entity_type,
            &entity.bundle,
            entity.uuid,
            pool_id,
            action,
        ) {
            return Ok(cached);
        }

        let Some(handler) = self.handler(rule) else {
            return Ok(IntentOutcome::Skipped(SkipReason::NotConfigured));
        };

        let mut envelope = EntityEnvelope::new(entity.uuid, entity.created, entity.changed);
        envelope.id = entity.local_id.clone();
        envelope.title = entity.label.clone();
        envelope.url = entity.url.clone();

        if action != SyncAction::Delete {
            if !handler.serialize(entity, rule, &mut envelope)? {
                record.record_export_failure(FailureDetail::new(
                    FailureKind::HandlerDenied,
                    action,
                    reason,
                    "handler vetoed the export",
                ));
                self.records.save(&record)?;
                return Ok(IntentOutcome::Skipped(SkipReason::HandlerIgnores));
            }

            self.embed_dependencies(ctx, entity, rule, pool, flow_id, pool_id, &mut envelope)
                .map_err(|error| self.fail_export(&mut record, action, reason, error))?;
        }

        // Schema drift forces a full re-create instead of a blind overwrite.
        if action == SyncAction::Update
            && !record.entity_type_version.is_empty()
            && record.entity_type_version != current_version
        {
            action = SyncAction::Create;
        }

        if let Err(error) = self.transmit(&record, pool, entity, &envelope, action, &current_version)
        {
            return Err(self.fail_export(&mut record, action, reason, error));
        }

        record.set_last_export(Some(self.now()));
        record.data.failure = None;
        if record.data.source_url.is_none() {
            record.data.source_url = entity.url.clone();
        }
        record.entity_type_version = current_version;
        if action == SyncAction::Delete {
            record.mark_deleted();
        }
        self.records.save(&record)?;

        tracing::debug!(
            entity = %entity.entity_ref(),
            flow = flow_id,
            pool = pool_id,
            ?action,
            "exported"
        );
        self.events.notify(&SyncEvent {
            direction: SyncDirection::Export,
            entity: entity.entity_ref(),
            flow_id: flow_id.to_string(),
            pool_id: pool_id.to_string(),
            action,
            reason,
        });
        ctx.record_outcome(
            &entity.entity_type,
            &entity.bundle,
            entity.uuid,
            pool_id,
            action,
            IntentOutcome::Performed,
        );
        Ok(IntentOutcome::Performed)
    }

    /// Exports referenced entities ahead of their referrer and attaches the
    /// embed pointers to the envelope.
    #[allow(clippy::too_many_arguments)]
    fn embed_dependencies(
        &self,
        ctx: &mut SyncContext,
        entity: &Entity,
        rule: &syndicate_config::EntityTypeRule,
        pool: &Pool,
        flow_id: &str,
        pool_id: &str,
        envelope: &mut EntityEnvelope,
    ) -> EngineResult<()> {
        let definitions = self
            .entities
            .field_definitions(&entity.entity_type, &entity.bundle)?;
        for definition in definitions
            .iter()
            .filter(|d| d.is_entity_reference && rule.field_syncs(&d.name))
        {
            let Some(value) = entity.field(&definition.name) else {
                continue;
            };
            for target in reference_targets(value) {
                let Some(dependency) = self.entities.load(&target.entity_type, target.uuid)?
                else {
                    continue;
                };
                let dep_outcome =
                    match ctx.enter_embed(&dependency.entity_type, dependency.uuid) {
                        EmbedEntry::Entered => {
                            let result =
                                self.export_dependency(ctx, &dependency, flow_id, pool_id);
                            ctx.exit_embed();
                            result.map_err(|error| EngineError::DependencyExportFailed {
                                entity: dependency.entity_ref().to_string(),
                                message: error.to_string(),
                            })?
                        }
                        // An ancestor on the stack is already transferring it.
                        EmbedEntry::Cycle => IntentOutcome::Performed,
                        EmbedEntry::DepthExceeded => {
                            IntentOutcome::Skipped(SkipReason::EmbedDepthExceeded)
                        }
                    };

                let auto_export = if dep_outcome.did_sync() {
                    AutoExport::ExportAsDependency
                } else {
                    AutoExport::ResolveIfExists
                };
                let dep_version =
                    self.schema_version_of(&dependency.entity_type, &dependency.bundle)?;
                let mut embed = EmbeddedRef::new(
                    pool.id.clone(),
                    dependency.entity_type.clone(),
                    dependency.bundle.clone(),
                    dep_version,
                    dependency.uuid,
                    auto_export,
                )
                .with_routing(
                    connection_id(
                        &pool.id,
                        &pool.site_id,
                        &dependency.entity_type,
                        &dependency.bundle,
                    ),
                    connection_id(&pool.id, "pool", &dependency.entity_type, &dependency.bundle),
                );
                if let Some(id) = &dependency.local_id {
                    embed = embed.with_id(id.clone());
                }
                envelope.push_embed(embed);
            }
        }
        Ok(())
    }

    fn export_dependency(
        &self,
        ctx: &mut SyncContext,
        dependency: &Entity,
        flow_id: &str,
        pool_id: &str,
    ) -> EngineResult<IntentOutcome> {
        let mut dep_record = self.records.get_or_create(
            &dependency.entity_ref(),
            FlowRef::Flow(flow_id.to_string()),
            pool_id,
        )?;
        if !dep_record.flags.dependency_export_enabled {
            dep_record.flags.dependency_export_enabled = true;
            self.records.save(&dep_record)?;
        }
        self.export_intent(
            ctx,
            dependency,
            flow_id,
            pool_id,
            SyncReason::AsDependency,
            SyncAction::Create,
        )
    }

    fn transmit(
        &self,
        record: &SyncRecord,
        pool: &Pool,
        entity: &Entity,
        envelope: &EntityEnvelope,
        action: SyncAction,
        current_version: &str,
    ) -> EngineResult<()> {
        let shared_id = entity.uuid.to_string();
        let body = serde_json::to_value(envelope)
            .map_err(|error| EngineError::Serialization(error.to_string()))?;

        match action {
            SyncAction::Create => {
                let url = entity_endpoint(
                    pool,
                    &entity.entity_type,
                    &entity.bundle,
                    current_version,
                    None,
                );
                let response = self.transport.request(Method::Post, &url, Some(&body))?;
                if !response.is_success() {
                    return Err(EngineError::InvalidStatusCode {
                        status: response.status,
                        url,
                    });
                }
            }
            SyncAction::Update => {
                let url = entity_endpoint(
                    pool,
                    &entity.entity_type,
                    &entity.bundle,
                    current_version,
                    Some(&shared_id),
                );
                let response = self.transport.request(Method::Put, &url, Some(&body))?;
                if response.is_not_found() {
                    // The broker lost the entity; fall back to a create.
                    let url = entity_endpoint(
                        pool,
                        &entity.entity_type,
                        &entity.bundle,
                        current_version,
                        None,
                    );
                    let response = self.transport.request(Method::Post, &url, Some(&body))?;
                    if !response.is_success() {
                        return Err(EngineError::InvalidStatusCode {
                            status: response.status,
                            url,
                        });
                    }
                } else if !response.is_success() {
                    return Err(EngineError::InvalidStatusCode {
                        status: response.status,
                        url,
                    });
                }
            }
            SyncAction::Delete => {
                // Address the schema version the broker knows the entity under.
                let version = if record.entity_type_version.is_empty() {
                    current_version
                } else {
                    &record.entity_type_version
                };
                let url = entity_endpoint(
                    pool,
                    &entity.entity_type,
                    &entity.bundle,
                    version,
                    Some(&shared_id),
                );
                let response = self.transport.request(Method::Delete, &url, None)?;
                // Already gone on the broker counts as deleted.
                if !response.is_success() && !response.is_not_found() {
                    return Err(EngineError::InvalidStatusCode {
                        status: response.status,
                        url,
                    });
                }
            }
        }
        Ok(())
    }

    /// Writes failure detail to the record before the error propagates.
    fn fail_export(
        &self,
        record: &mut SyncRecord,
        action: SyncAction,
        reason: SyncReason,
        error: EngineError,
    ) -> EngineError {
        record.record_export_failure(FailureDetail::new(
            error.failure_kind(),
            action,
            reason,
            error.to_string(),
        ));
        if let Err(save_error) = self.records.save(record) {
            tracing::warn!(
                entity = %record.entity,
                "failed to persist export failure detail: {save_error}"
            );
        }
        error
    }
}
