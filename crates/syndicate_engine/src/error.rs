//! Error taxonomy: hard failures and soft skip reasons.

use syndicate_record::{FailureKind, RecordError};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Hard failures of a sync intent.
///
/// Hard failures are recorded on the sync record with structured detail
/// before they propagate; the caller is responsible for operator
/// visibility. Expected outcomes are [`SkipReason`]s, not errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The broker request could not be sent.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The broker answered with an unexpected status code.
    #[error("invalid status code {status} from {url}")]
    InvalidStatusCode {
        /// HTTP status code received.
        status: u16,
        /// The URL that was addressed.
        url: String,
    },

    /// Serializing or deserializing an entity failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Exporting an embedded dependency failed.
    #[error("dependency export failed for {entity}: {message}")]
    DependencyExportFailed {
        /// The dependency that failed.
        entity: String,
        /// Description of the failure.
        message: String,
    },

    /// The incoming payload carries a different schema version than the
    /// local configuration. Distinct from a routine 404 so callers can
    /// tell a drifted schema from a missing entity.
    #[error("incompatible schema version: local={local}, remote={remote}")]
    IncompatibleVersion {
        /// Locally configured schema version.
        local: String,
        /// Version carried by the payload.
        remote: String,
    },

    /// The record store failed.
    #[error("record store error: {0}")]
    Record(#[from] RecordError),

    /// The envelope codec failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] syndicate_protocol::ProtocolError),

    /// The host entity store failed.
    #[error("entity store error: {message}")]
    EntityStore {
        /// Description of the store failure.
        message: String,
    },
}

impl EngineError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an entity store error.
    pub fn entity_store(message: impl Into<String>) -> Self {
        Self::EntityStore {
            message: message.into(),
        }
    }

    /// Maps the error to the failure kind recorded on the sync record.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            EngineError::Transport { .. } => FailureKind::RequestFailed,
            EngineError::InvalidStatusCode { .. } => FailureKind::InvalidStatusCode,
            EngineError::DependencyExportFailed { .. } => FailureKind::DependencyExportFailed,
            _ => FailureKind::SerializationError,
        }
    }
}

/// Expected, non-erroneous reasons an intent did not synchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A delete was requested but the entity was never exported.
    NeverExported,
    /// Content and schema are unchanged since the last export.
    Unchanged,
    /// The entity was just imported within this unit of work.
    JustImported,
    /// The serialization handler vetoed the transfer.
    HandlerIgnores,
    /// The flow ignores remote updates after the first import.
    IgnoreUpdates,
    /// Manual import mode requires the first create to be manual.
    ManualImportRequired,
    /// The addressed pool is not configured on this site.
    UnknownPool,
    /// No configured flow matched the sync.
    NoMatchingFlow,
    /// The flow's rules do not cover this entity type, reason or action.
    NotConfigured,
    /// The dependency embedding depth limit was reached.
    EmbedDepthExceeded,
}

/// Terminal outcome of one export or import intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOutcome {
    /// The transfer happened.
    Performed,
    /// Nothing was transferred; the reason is expected.
    Skipped(SkipReason),
}

impl IntentOutcome {
    /// Returns true if the intent actually synchronized something.
    pub fn did_sync(&self) -> bool {
        matches!(self, IntentOutcome::Performed)
    }

    /// Returns the skip reason, if the intent was skipped.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            IntentOutcome::Performed => None,
            IntentOutcome::Skipped(reason) => Some(*reason),
        }
    }
}
