//! # Syndicate Record
//!
//! Per-entity synchronization state for Syndicate.
//!
//! Every entity that takes part in synchronization gets one [`SyncRecord`]
//! per (flow, pool) pair. The record carries:
//! - a typed flag set (deleted, export enabled, failure markers, ...)
//! - the last export/import timestamps with their reset/failure side effects
//! - typed side-tables for handler-private state (failure detail, the
//!   ordered-merge bookkeeping, a free-form key-path bag)
//!
//! Records are created lazily on the first export or import intent and live
//! until the entity is deleted, the flow or pool is removed, or orphan
//! cleanup purges them.
//!
//! # Invariants
//!
//! - At most one record per (entity, flow, pool)
//! - Resetting a timestamp to `None` sets the matching "was reset" flag and
//!   clears the failure flags for that direction
//! - Setting a non-null timestamp clears "was reset" and the failure flags
//! - Records without a flow (orphans) exist only until the entity gets a
//!   real successful import for the same pool

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod data;
mod error;
mod record;
mod store;

pub use data::{FailureDetail, FailureKind, MergeState, RecordData};
pub use error::{RecordError, RecordResult};
pub use record::{EntityHandle, EntityRef, FlowRef, RecordFlags, SyncRecord};
pub use store::{FlowFilter, MemoryRecordStore, RecordStore};
