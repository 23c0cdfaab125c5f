//! Stream metadata: a directed multi-sink edge between ports.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::plan::ports::PortRef;

/// Placement hint constraining how the physical planner co-locates the
/// endpoints of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locality {
    /// Endpoints deploy to the same host.
    NodeLocal,
    /// Endpoints deploy to the same container.
    ContainerLocal,
    /// Endpoints share one thread; tuples pass by reference.
    ThreadLocal,
    /// Endpoints deploy to the same rack.
    RackLocal,
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NodeLocal => "NODE_LOCAL",
            Self::ContainerLocal => "CONTAINER_LOCAL",
            Self::ThreadLocal => "THREAD_LOCAL",
            Self::RackLocal => "RACK_LOCAL",
        };
        f.write_str(name)
    }
}

impl FromStr for Locality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NODE_LOCAL" => Ok(Self::NodeLocal),
            "CONTAINER_LOCAL" => Ok(Self::ContainerLocal),
            "THREAD_LOCAL" => Ok(Self::ThreadLocal),
            "RACK_LOCAL" => Ok(Self::RackLocal),
            other => Err(format!("unknown locality: {other}")),
        }
    }
}

/// Representation of a stream in the logical layer.
///
/// A stream carries tuples from exactly one output port to one or more
/// input ports, in sink attachment order. Instances are created through
/// [`LogicalPlan::add_stream`](crate::plan::LogicalPlan::add_stream) and
/// wired through the plan so adjacency bookkeeping stays consistent.
#[derive(Debug)]
pub struct StreamMeta {
    id: String,
    source: Option<PortRef>,
    sinks: Vec<PortRef>,
    locality: Option<Locality>,
}

impl StreamMeta {
    pub(crate) fn new(id: String) -> Self {
        Self {
            id,
            source: None,
            sinks: Vec::new(),
            locality: None,
        }
    }

    /// The stream's unique id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The source output port, if one has been set.
    #[must_use]
    pub fn source(&self) -> Option<&PortRef> {
        self.source.as_ref()
    }

    /// Sink input ports in attachment order.
    #[must_use]
    pub fn sinks(&self) -> &[PortRef] {
        &self.sinks
    }

    /// The stream's locality hint, if any.
    #[must_use]
    pub fn locality(&self) -> Option<Locality> {
        self.locality
    }

    /// Sets or clears the locality hint.
    pub fn set_locality(&mut self, locality: Option<Locality>) {
        self.locality = locality;
    }

    pub(crate) fn set_source(&mut self, source: PortRef) -> Option<PortRef> {
        self.source.replace(source)
    }

    pub(crate) fn push_sink(&mut self, sink: PortRef) {
        self.sinks.push(sink);
    }

    pub(crate) fn retain_sinks(&mut self, keep: impl FnMut(&PortRef) -> bool) {
        self.sinks.retain(keep);
    }

    pub(crate) fn take_endpoints(&mut self) -> (Option<PortRef>, Vec<PortRef>) {
        (self.source.take(), std::mem::take(&mut self.sinks))
    }
}

impl PartialEq for StreamMeta {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for StreamMeta {}
