//! Per-unit-of-work sync state.

use crate::error::IntentOutcome;
use std::collections::{HashMap, HashSet};
use syndicate_config::SyncAction;
use uuid::Uuid;

/// Maximum depth of the dependency embedding stack.
pub const MAX_EMBED_DEPTH: usize = 16;

/// Create and update share one dedup slot; delete gets its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ActionClass {
    Write,
    Delete,
}

impl ActionClass {
    fn of(action: SyncAction) -> Self {
        match action {
            SyncAction::Create | SyncAction::Update => ActionClass::Write,
            SyncAction::Delete => ActionClass::Delete,
        }
    }
}

type ExportKey = (String, String, Uuid, String, ActionClass);

/// Result of entering the embedding stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedEntry {
    /// The entity was pushed; the caller must call [`SyncContext::exit_embed`].
    Entered,
    /// The entity is already on the stack.
    Cycle,
    /// The stack is at [`MAX_EMBED_DEPTH`].
    DepthExceeded,
}

/// State scoped to one unit of work (one request or job run).
///
/// There are no globals in the engine: de-duplication of repeated exports,
/// suppression of import echoes and the dependency embedding stack all live
/// here. Callers create one context per unit of work and pass it through.
#[derive(Debug, Default)]
pub struct SyncContext {
    exported: HashMap<ExportKey, IntentOutcome>,
    just_imported: HashSet<(String, Uuid)>,
    embed_stack: Vec<(String, Uuid)>,
}

impl SyncContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the outcome of an earlier transfer of the same entity to the
    /// same pool within this unit of work.
    pub fn cached_outcome(
        &self,
        entity_type: &str,
        bundle: &str,
        uuid: Uuid,
        pool: &str,
        action: SyncAction,
    ) -> Option<IntentOutcome> {
        self.exported
            .get(&(
                entity_type.to_string(),
                bundle.to_string(),
                uuid,
                pool.to_string(),
                ActionClass::of(action),
            ))
            .copied()
    }

    /// Caches the outcome of a transfer.
    pub fn record_outcome(
        &mut self,
        entity_type: &str,
        bundle: &str,
        uuid: Uuid,
        pool: &str,
        action: SyncAction,
        outcome: IntentOutcome,
    ) {
        self.exported.insert(
            (
                entity_type.to_string(),
                bundle.to_string(),
                uuid,
                pool.to_string(),
                ActionClass::of(action),
            ),
            outcome,
        );
    }

    /// Marks an entity as imported within this unit of work.
    pub fn mark_just_imported(&mut self, entity_type: &str, uuid: Uuid) {
        self.just_imported.insert((entity_type.to_string(), uuid));
    }

    /// Returns true if the entity was imported within this unit of work.
    pub fn was_just_imported(&self, entity_type: &str, uuid: Uuid) -> bool {
        self.just_imported
            .contains(&(entity_type.to_string(), uuid))
    }

    /// Pushes an entity onto the embedding stack.
    pub fn enter_embed(&mut self, entity_type: &str, uuid: Uuid) -> EmbedEntry {
        let key = (entity_type.to_string(), uuid);
        if self.embed_stack.contains(&key) {
            return EmbedEntry::Cycle;
        }
        if self.embed_stack.len() >= MAX_EMBED_DEPTH {
            return EmbedEntry::DepthExceeded;
        }
        self.embed_stack.push(key);
        EmbedEntry::Entered
    }

    /// Pops the embedding stack.
    pub fn exit_embed(&mut self) {
        self.embed_stack.pop();
    }

    /// Current depth of the embedding stack.
    pub fn embed_depth(&self) -> usize {
        self.embed_stack.len()
    }
}
