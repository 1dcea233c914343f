//! Typed side tables for handler-private record state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use syndicate_config::{SyncAction, SyncReason};

/// Classification of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The broker request could not be sent.
    RequestFailed,
    /// The broker answered with an unexpected status code.
    InvalidStatusCode,
    /// A dependency export failed while embedding.
    DependencyExportFailed,
    /// Serialization of the entity failed.
    SerializationError,
    /// The handler vetoed the sync (expected outcome).
    HandlerDenied,
    /// The entity was unchanged since the last sync (expected outcome).
    Unchanged,
    /// A delete was requested for an entity never exported (expected).
    NeverExported,
    /// An export echo of an import in the same unit was suppressed (expected).
    JustImported,
    /// The flow ignores remote updates after the first import (expected).
    IgnoreUpdates,
    /// The addressed pool is not configured on this site (expected).
    UnknownPool,
    /// No configured flow matched an inbound sync (expected).
    NoMatchingFlow,
}

impl FailureKind {
    /// Returns true for expected, non-operator-visible failures.
    pub fn is_soft(&self) -> bool {
        !matches!(
            self,
            FailureKind::RequestFailed
                | FailureKind::InvalidStatusCode
                | FailureKind::DependencyExportFailed
                | FailureKind::SerializationError
        )
    }
}

/// Structured detail of the last failure, kept on the record so the state
/// stays observable even when the error propagates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// What went wrong.
    pub kind: FailureKind,
    /// The action that was being performed.
    pub action: SyncAction,
    /// The reason the intent was started.
    pub reason: SyncReason,
    /// Human readable message.
    pub message: String,
}

impl FailureDetail {
    /// Creates a new failure detail.
    pub fn new(
        kind: FailureKind,
        action: SyncAction,
        reason: SyncReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            action,
            reason,
            message: message.into(),
        }
    }
}

/// Bookkeeping of the ordered-reference merge for one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeState {
    /// Shared ids the last import wrote, in remote order.
    pub last_imported_values: Vec<String>,
    /// Full reference descriptors the remote sent last time.
    pub last_overwrite_values: Vec<Value>,
}

/// Handler-private record state.
///
/// Concerns with known structure get typed fields; anything else lives in
/// the `extra` bag with a get-by-path / set-by-path / delete-by-null
/// contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordData {
    /// Canonical remote URL of the entity, written on first export.
    pub source_url: Option<String>,
    /// Detail of the last recorded failure.
    pub failure: Option<FailureDetail>,
    /// Per-field merge bookkeeping, keyed by field name.
    pub merge_state: BTreeMap<String, MergeState>,
    /// Free-form nested values for handlers without a typed table.
    pub extra: BTreeMap<String, Value>,
}

impl RecordData {
    /// Gets a value from the extra bag by key path.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.extra.get(*first)?;
        for key in rest {
            current = current.as_object()?.get(*key)?;
        }
        Some(current)
    }

    /// Sets a value in the extra bag by key path.
    ///
    /// Setting `Value::Null` deletes the leaf instead, preserving the
    /// delete-by-null contract of the callers. Intermediate objects are
    /// created as needed.
    pub fn set_path(&mut self, path: &[&str], value: Value) {
        let Some((first, rest)) = path.split_first() else {
            return;
        };

        if rest.is_empty() {
            if value.is_null() {
                self.extra.remove(*first);
            } else {
                self.extra.insert((*first).to_string(), value);
            }
            return;
        }

        let entry = self
            .extra
            .entry((*first).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        set_nested(entry, rest, value);

        // Collapse a branch emptied by delete-by-null.
        if self
            .extra
            .get(*first)
            .and_then(|v| v.as_object())
            .is_some_and(|o| o.is_empty())
        {
            self.extra.remove(*first);
        }
    }
}

fn set_nested(target: &mut Value, path: &[&str], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };

    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let Some(map) = target.as_object_mut() else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(*first);
        } else {
            map.insert((*first).to_string(), value);
        }
        return;
    }

    let entry = map
        .entry((*first).to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    set_nested(entry, rest, value);
    if entry.as_object().is_some_and(|o| o.is_empty()) {
        map.remove(*first);
    }
}
