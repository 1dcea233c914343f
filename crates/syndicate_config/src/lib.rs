//! # Syndicate Config
//!
//! Flow and pool synchronization rules for Syndicate.
//!
//! This crate provides the read-only (at sync time) rule model that decides
//! which entity types and bundles synchronize, in which direction, to which
//! pools, and under which conflict policy:
//! - Reasons, actions and sync modes as closed enums with explicit expansion
//! - Per entity-type/bundle rules with pool assignments and field overrides
//! - Pools (named remote targets on the broker)
//!
//! Flows and pools are immutable during a sync run: the engine takes them by
//! shared reference and never mutates them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod flow;
mod pool;
mod reason;
mod site;

pub use flow::{
    EntityTypeRule, ExportMode, FieldRule, Flow, ImportMode, PoolAssignment, TypeBundle,
    UpdateBehavior,
};
pub use pool::{AuthType, Pool};
pub use reason::{ReasonFilter, SyncAction, SyncReason};
pub use site::SiteConfig;
