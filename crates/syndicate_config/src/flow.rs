//! Flows: per-site synchronization rules.

use crate::reason::{ReasonFilter, SyncAction, SyncReason};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Export mode for an entity type within a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// Never export.
    Disabled,
    /// Export on every change.
    Automatic,
    /// Export only when a user requests it.
    Manual,
    /// Export only when pulled in as a dependency.
    AsDependency,
    /// Export only through programmatic forced calls.
    Forced,
}

impl ExportMode {
    /// Returns true if this mode allows an export for the given reason.
    pub fn allows(&self, reason: SyncReason) -> bool {
        match self {
            ExportMode::Disabled => false,
            ExportMode::Automatic => true,
            ExportMode::Manual => !matches!(reason, SyncReason::Automatic),
            ExportMode::AsDependency => {
                matches!(reason, SyncReason::AsDependency | SyncReason::Forced)
            }
            ExportMode::Forced => matches!(reason, SyncReason::Forced),
        }
    }
}

/// Import mode for an entity type within a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Never import.
    Disabled,
    /// Import on every remote change.
    Automatic,
    /// Import only when a user requests it.
    Manual,
    /// Import only as a dependency of another imported entity.
    AsDependency,
}

impl ImportMode {
    /// Returns true if this mode allows an import for the given reason and action.
    ///
    /// A manually imported entity graduates to automatic updates: in `Manual`
    /// mode an `Automatic` reason is allowed for everything except the
    /// first-time create.
    pub fn allows(&self, reason: SyncReason, action: SyncAction) -> bool {
        match self {
            ImportMode::Disabled => false,
            ImportMode::Automatic => true,
            ImportMode::Manual => match reason {
                SyncReason::Automatic => !matches!(action, SyncAction::Create),
                _ => true,
            },
            ImportMode::AsDependency => {
                matches!(reason, SyncReason::AsDependency | SyncReason::Forced)
            }
        }
    }
}

/// How an import treats an entity that was changed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateBehavior {
    /// Remote always wins; local edits are overwritten.
    ForceOverwrite,
    /// Remote updates are ignored after the first import.
    IgnoreUpdates,
    /// Remote wins and the entity is locked against local edits.
    ForceAndLock,
    /// Local edits survive; only untouched parts follow the remote.
    AllowLocalOverride,
}

impl UpdateBehavior {
    /// Returns true if local edits are merged rather than overwritten.
    pub fn merges_local_changes(&self) -> bool {
        matches!(self, UpdateBehavior::AllowLocalOverride)
    }
}

/// Pool assignment for an entity type within a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolAssignment {
    /// The pool is always used.
    Force,
    /// The pool is used when the user enabled it for the entity.
    Allow,
    /// The pool is never used.
    Forbid,
}

/// Per-field override within an entity type rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Whether the field value is transported at all.
    pub sync: bool,
}

impl FieldRule {
    /// A rule that excludes the field from synchronization.
    pub fn ignored() -> Self {
        Self { sync: false }
    }
}

/// Key for entity type rules: entity type plus bundle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeBundle {
    /// Entity type machine name.
    pub entity_type: String,
    /// Bundle machine name.
    pub bundle: String,
}

impl TypeBundle {
    /// Creates a new type/bundle key.
    pub fn new(entity_type: impl Into<String>, bundle: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
        }
    }
}

/// Synchronization rule for one entity type + bundle within a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTypeRule {
    /// Handler name; `None` means the type is ignored by this flow.
    pub handler: Option<String>,
    /// Schema version hash of the entity type at configuration time.
    pub entity_type_version: String,
    /// Export mode.
    pub export_mode: ExportMode,
    /// Import mode.
    pub import_mode: ImportMode,
    /// Export pool assignments. Pools not listed are treated as forbidden.
    pub export_pools: BTreeMap<String, PoolAssignment>,
    /// Import pool assignments. Pools not listed are treated as forbidden.
    pub import_pools: BTreeMap<String, PoolAssignment>,
    /// Whether local deletions are propagated to the broker.
    pub allow_export_deletion: bool,
    /// Whether remote deletions are applied locally.
    pub import_deletions: bool,
    /// Conflict policy applied on imported updates.
    pub update_behavior: UpdateBehavior,
    /// Entity types whose "changed" timestamp cannot be trusted (e.g.
    /// hierarchical taxonomy-like types) are exempt from the unchanged skip.
    pub unreliable_changed_timestamp: bool,
    /// Per-field overrides; fields not listed sync by default.
    pub field_overrides: BTreeMap<String, FieldRule>,
}

impl EntityTypeRule {
    /// Creates a rule with a handler and sensible defaults.
    pub fn new(handler: impl Into<String>, entity_type_version: impl Into<String>) -> Self {
        Self {
            handler: Some(handler.into()),
            entity_type_version: entity_type_version.into(),
            export_mode: ExportMode::Disabled,
            import_mode: ImportMode::Disabled,
            export_pools: BTreeMap::new(),
            import_pools: BTreeMap::new(),
            allow_export_deletion: false,
            import_deletions: true,
            update_behavior: UpdateBehavior::ForceOverwrite,
            unreliable_changed_timestamp: false,
            field_overrides: BTreeMap::new(),
        }
    }

    /// Creates a rule that ignores the entity type.
    pub fn ignored() -> Self {
        Self {
            handler: None,
            entity_type_version: String::new(),
            export_mode: ExportMode::Disabled,
            import_mode: ImportMode::Disabled,
            export_pools: BTreeMap::new(),
            import_pools: BTreeMap::new(),
            allow_export_deletion: false,
            import_deletions: false,
            update_behavior: UpdateBehavior::ForceOverwrite,
            unreliable_changed_timestamp: false,
            field_overrides: BTreeMap::new(),
        }
    }

    /// Sets the export mode.
    pub fn with_export_mode(mut self, mode: ExportMode) -> Self {
        self.export_mode = mode;
        self
    }

    /// Sets the import mode.
    pub fn with_import_mode(mut self, mode: ImportMode) -> Self {
        self.import_mode = mode;
        self
    }

    /// Assigns an export pool.
    pub fn with_export_pool(mut self, pool: impl Into<String>, assignment: PoolAssignment) -> Self {
        self.export_pools.insert(pool.into(), assignment);
        self
    }

    /// Assigns an import pool.
    pub fn with_import_pool(mut self, pool: impl Into<String>, assignment: PoolAssignment) -> Self {
        self.import_pools.insert(pool.into(), assignment);
        self
    }

    /// Allows exporting deletions.
    pub fn with_export_deletion(mut self, allow: bool) -> Self {
        self.allow_export_deletion = allow;
        self
    }

    /// Sets the update conflict behavior.
    pub fn with_update_behavior(mut self, behavior: UpdateBehavior) -> Self {
        self.update_behavior = behavior;
        self
    }

    /// Marks the changed timestamp as unreliable for this type.
    pub fn with_unreliable_changed_timestamp(mut self) -> Self {
        self.unreliable_changed_timestamp = true;
        self
    }

    /// Adds a field override.
    pub fn with_field_override(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.field_overrides.insert(field.into(), rule);
        self
    }

    /// Returns true if a field is transported under this rule.
    pub fn field_syncs(&self, field: &str) -> bool {
        self.field_overrides.get(field).map_or(true, |f| f.sync)
    }

    /// Returns the assignment of an export pool (unlisted pools are forbidden).
    pub fn export_pool_assignment(&self, pool: &str) -> PoolAssignment {
        self.export_pools
            .get(pool)
            .copied()
            .unwrap_or(PoolAssignment::Forbid)
    }

    /// Returns the assignment of an import pool (unlisted pools are forbidden).
    pub fn import_pool_assignment(&self, pool: &str) -> PoolAssignment {
        self.import_pools
            .get(pool)
            .copied()
            .unwrap_or(PoolAssignment::Forbid)
    }
}

/// A flow: the complete rule set of one synchronization channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Flow machine name, unique per site.
    pub id: String,
    /// Human readable label.
    pub label: String,
    /// Rules per entity type + bundle.
    pub rules: BTreeMap<TypeBundle, EntityTypeRule>,
}

impl Flow {
    /// Creates a new empty flow.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            rules: BTreeMap::new(),
        }
    }

    /// Adds a rule for an entity type + bundle.
    pub fn with_rule(mut self, key: TypeBundle, rule: EntityTypeRule) -> Self {
        self.rules.insert(key, rule);
        self
    }

    /// Returns the rule for an entity type + bundle, if any.
    pub fn rule(&self, entity_type: &str, bundle: &str) -> Option<&EntityTypeRule> {
        self.rules.get(&TypeBundle::new(entity_type, bundle))
    }

    /// Decides whether this flow exports the given entity type.
    ///
    /// Evaluates, in order: a handler is assigned, the export mode allows at
    /// least one of the filtered reasons, deletions are explicitly allowed for
    /// the delete action, and the named pool (if any) is not forbidden.
    pub fn can_export(
        &self,
        entity_type: &str,
        bundle: &str,
        reason: impl Into<ReasonFilter>,
        action: SyncAction,
        pool: Option<&str>,
    ) -> bool {
        let Some(rule) = self.rule(entity_type, bundle) else {
            return false;
        };
        if rule.handler.is_none() {
            return false;
        }
        let filter = reason.into();
        if !filter.expand().iter().any(|r| rule.export_mode.allows(*r)) {
            return false;
        }
        if action.is_delete() && !rule.allow_export_deletion {
            return false;
        }
        if let Some(pool) = pool {
            if rule.export_pool_assignment(pool) == PoolAssignment::Forbid {
                return false;
            }
        }
        true
    }

    /// Decides whether this flow imports the given entity type.
    ///
    /// Mirrors [`Flow::can_export`] with the import mode and the manual
    /// graduation rule, and checks `import_deletions` for the delete action.
    pub fn can_import(
        &self,
        entity_type: &str,
        bundle: &str,
        reason: impl Into<ReasonFilter>,
        action: SyncAction,
        pool: Option<&str>,
    ) -> bool {
        let Some(rule) = self.rule(entity_type, bundle) else {
            return false;
        };
        if rule.handler.is_none() {
            return false;
        }
        let filter = reason.into();
        if !filter
            .expand()
            .iter()
            .any(|r| rule.import_mode.allows(*r, action))
        {
            return false;
        }
        if action.is_delete() && !rule.import_deletions {
            return false;
        }
        if let Some(pool) = pool {
            if rule.import_pool_assignment(pool) == PoolAssignment::Forbid {
                return false;
            }
        }
        true
    }
}
