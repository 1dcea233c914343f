//! Sync reasons and actions.

use serde::{Deserialize, Serialize};

/// Why a sync intent was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    /// Triggered by a local or remote entity change.
    Automatic,
    /// Explicitly requested by a user.
    Manual,
    /// Pulled in as a dependency of another entity.
    AsDependency,
    /// Forced programmatically, bypassing mode checks short of `Disabled`.
    Forced,
}

impl SyncReason {
    /// Converts to a stable wire code.
    pub fn to_code(&self) -> u8 {
        match self {
            SyncReason::Automatic => 1,
            SyncReason::Manual => 2,
            SyncReason::AsDependency => 3,
            SyncReason::Forced => 4,
        }
    }

    /// Converts from a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SyncReason::Automatic),
            2 => Some(SyncReason::Manual),
            3 => Some(SyncReason::AsDependency),
            4 => Some(SyncReason::Forced),
            _ => None,
        }
    }
}

/// A reason filter for rule evaluation.
///
/// `Any` expands to the non-forced reasons via [`ReasonFilter::expand`];
/// there is no string-based wildcard anywhere in the rule model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonFilter {
    /// Matches automatic, manual and as-dependency syncs.
    Any,
    /// Matches exactly one reason.
    Only(SyncReason),
}

impl ReasonFilter {
    /// Expands the filter to the concrete reasons it covers.
    pub fn expand(&self) -> &[SyncReason] {
        match self {
            ReasonFilter::Any => &[
                SyncReason::Automatic,
                SyncReason::Manual,
                SyncReason::AsDependency,
            ],
            ReasonFilter::Only(reason) => std::slice::from_ref(reason),
        }
    }
}

impl From<SyncReason> for ReasonFilter {
    fn from(reason: SyncReason) -> Self {
        ReasonFilter::Only(reason)
    }
}

/// The directed action a sync intent performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Entity does not yet exist on the receiving side.
    Create,
    /// Entity exists on the receiving side and is updated.
    Update,
    /// Entity is removed on the receiving side.
    Delete,
}

impl SyncAction {
    /// Returns true for the delete action.
    pub fn is_delete(&self) -> bool {
        matches!(self, SyncAction::Delete)
    }
}
