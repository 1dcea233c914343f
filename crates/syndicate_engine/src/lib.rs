//! # Syndicate Engine
//!
//! The synchronization state machine and reconciliation engine.
//!
//! This crate provides:
//! - Export and import intents (one directed transfer of one entity)
//! - Request-scoped sync context (de-duplication, echo suppression,
//!   dependency-embedding cycle guard)
//! - The forward-dependency resolver with a durable waiting list
//! - The order-preserving three-way merge for ordered reference lists
//! - Seams for the host entity store and the broker transport
//!
//! ## Architecture
//!
//! A local entity change triggers an export intent per applicable
//! (flow, pool) pair; the intent serializes the entity, embeds or queues
//! dependencies, transmits the envelope and updates the sync record. A
//! remote notification triggers an import intent; the entity is written
//! locally, unresolved references go to the dependency resolver, ordered
//! reference lists are reconciled by the three-way merge, and anything
//! waiting on the entity is replayed.
//!
//! ## Key invariants
//!
//! - Soft outcomes never raise errors; they return a skip reason
//! - Failure detail is written to the sync record before an error
//!   propagates, so state stays observable on throw
//! - All per-unit state lives in an explicit [`SyncContext`]; intents for
//!   one entity must be serialized by the caller

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod context;
mod engine;
mod entity;
mod error;
mod events;
mod export;
mod http;
mod import;
mod merge;
mod resolver;
mod serializer;
mod transport;

pub use context::{EmbedEntry, SyncContext, MAX_EMBED_DEPTH};
pub use engine::SyncEngine;
pub use entity::{Entity, EntityStore, FieldDescriptor, MemoryEntityStore};
pub use error::{EngineError, EngineResult, IntentOutcome, SkipReason};
pub use events::{EventSink, MemorySink, NullSink, SyncDirection, SyncEvent};
pub use export::IntentReport;
pub use http::{HttpBrokerTransport, HttpClient};
pub use import::ImportRequest;
pub use merge::{merge_ordered_references, MergeInput};
pub use resolver::{DependencyStore, MemoryDependencyStore, WaitingEntry};
pub use serializer::{
    reference_descriptor, reference_targets, reference_uuids, EntityHandler, GenericHandler,
    ReferenceTarget,
};
pub use transport::{
    entity_endpoint, BrokerResponse, BrokerTransport, Method, MockBroker, RecordedRequest,
};
