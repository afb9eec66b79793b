//! Filter arena and output ports.

use super::Filter;
use crate::buffer::AvTransBuffer;
use crate::error::{FilterError, FilterResult};
use crate::format::Capability;
use crate::plugin::ParamMap;
use daggy::{Dag, NodeIndex};
use std::sync::{Arc, RwLock, Weak};

/// Identifier of a filter in a pipeline arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(pub(crate) NodeIndex);

impl FilterId {
    /// Position in the arena.
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

/// Edge between two filters.
#[derive(Debug, Clone, Default)]
pub struct Link;

/// Arena holding a pipeline's filters.
pub type FilterGraph = Dag<Arc<dyn Filter>, Link>;

/// Output port of a filter, pointing at the filter downstream of it.
///
/// The arena is only read-locked long enough to clone the target filter's
/// handle; the call itself runs without the lock held.
#[derive(Clone)]
pub struct OutPort {
    graph: Weak<RwLock<FilterGraph>>,
    peer: FilterId,
}

impl OutPort {
    /// Port into `peer` of `graph`.
    pub fn new(graph: Weak<RwLock<FilterGraph>>, peer: FilterId) -> Self {
        Self { graph, peer }
    }

    /// Downstream filter id.
    pub fn peer(&self) -> FilterId {
        self.peer
    }

    fn target(&self) -> FilterResult<Arc<dyn Filter>> {
        let graph = self.graph.upgrade().ok_or(FilterError::NullPointer)?;
        let guard = graph.read().unwrap();
        guard
            .node_weight(self.peer.0)
            .cloned()
            .ok_or(FilterError::NotExisted)
    }

    /// Offer a capability downstream.
    pub fn negotiate(&self, offered: &Capability) -> FilterResult<Capability> {
        self.target()?.negotiate(offered)
    }

    /// Configure the downstream filter.
    pub fn configure(&self, meta: &ParamMap) -> FilterResult {
        self.target()?.configure(meta)
    }

    /// Hand a buffer to the downstream filter's input port.
    pub fn push(&self, buffer: AvTransBuffer) -> FilterResult {
        let target = self.target()?;
        target.push_data(target.name(), buffer)
    }
}

impl std::fmt::Debug for OutPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutPort")
            .field("peer", &self.peer.index())
            .finish()
    }
}
