//! Site configuration: the full rule set of one participating site.

use crate::flow::Flow;
use crate::pool::Pool;
use crate::reason::{ReasonFilter, SyncAction};
use std::collections::BTreeMap;

/// The complete synchronization configuration of one site.
///
/// Immutable during a sync run; the engine only reads from it.
#[derive(Debug, Clone, Default)]
pub struct SiteConfig {
    flows: Vec<Flow>,
    pools: BTreeMap<String, Pool>,
}

impl SiteConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a flow.
    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flows.push(flow);
        self
    }

    /// Adds a pool.
    pub fn with_pool(mut self, pool: Pool) -> Self {
        self.pools.insert(pool.id.clone(), pool);
        self
    }

    /// Returns all flows.
    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    /// Looks up a flow by id.
    pub fn flow(&self, id: &str) -> Option<&Flow> {
        self.flows.iter().find(|f| f.id == id)
    }

    /// Looks up a pool by id.
    pub fn pool(&self, id: &str) -> Option<&Pool> {
        self.pools.get(id)
    }

    /// Returns all pools.
    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    /// Returns the flows that export the given entity type.
    pub fn exporting_flows(
        &self,
        entity_type: &str,
        bundle: &str,
        reason: impl Into<ReasonFilter> + Copy,
        action: SyncAction,
    ) -> Vec<&Flow> {
        self.flows
            .iter()
            .filter(|f| f.can_export(entity_type, bundle, reason, action, None))
            .collect()
    }

    /// Returns the first flow that imports the given entity type from a pool.
    pub fn importing_flow(
        &self,
        entity_type: &str,
        bundle: &str,
        reason: impl Into<ReasonFilter> + Copy,
        action: SyncAction,
        pool: &str,
    ) -> Option<&Flow> {
        self.flows
            .iter()
            .find(|f| f.can_import(entity_type, bundle, reason, action, Some(pool)))
    }
}
