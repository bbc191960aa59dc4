//! `flowtrace`: Paris-traceroute and Multipath Detection Algorithm (MDA)
//! network probing engine.
//!
//! This crate is a thin facade over [`flowtrace_core`], [`flowtrace_net`]
//! and [`flowtrace_packet`], re-exporting the pieces an embedder needs and
//! adding [`Flowtrace`], a convenience wrapper pairing an [`EventLoop`] with
//! the routing table it needs to address each instance's probes.

pub use flowtrace_core::{
    AlgorithmEvent, AlgorithmHost, AlgorithmKind, AlgorithmResult, Config, CoreError, Edge,
    EventLoop, ExplicitTransport, FlowId, FlowPool, InstanceId, InstanceRoute, IpFamily, Lattice,
    LoopEvent, MdaAlgorithm, MdaEvent, Node, Protocol, Round, Sequence, TerminationReason,
    TimeToLive, TraceId, TracerouteAlgorithm, TracerouteEvent,
};
pub use flowtrace_net::{NetError, Pacer, Privilege};
pub use flowtrace_packet::{
    Address, Family, MatchingKey, PacketError, Probe, Reply, ReplyClassification,
};

use std::collections::HashMap;
use std::time::Duration;

/// An [`EventLoop`] paired with the routing table its instances need,
/// so a caller doesn't have to thread a `HashMap<InstanceId, InstanceRoute>`
/// through their own code.
pub struct Flowtrace {
    event_loop: EventLoop,
    routes: HashMap<InstanceId, InstanceRoute>,
}

impl Flowtrace {
    /// Create an engine applying `min_inter_send` globally across every
    /// instance it hosts.
    #[must_use]
    pub fn new(min_inter_send: Duration) -> Self {
        Self {
            event_loop: EventLoop::new(min_inter_send),
            routes: HashMap::new(),
        }
    }

    /// Add an algorithm instance (Paris-traceroute or MDA, per
    /// `config.algorithm`), opening whatever raw sockets its protocol and
    /// address family need.
    pub fn probe(&mut self, config: &Config) -> Result<InstanceId, CoreError> {
        let id = self.event_loop.add_instance(config)?;
        self.routes.insert(id, InstanceRoute::from_config(config));
        Ok(id)
    }

    pub fn stop(&mut self, id: InstanceId) {
        self.event_loop.stop_instance(id);
        self.routes.remove(&id);
    }

    pub fn terminate(&mut self) {
        self.event_loop.terminate();
    }

    /// Run a single loop iteration, dispatching [`LoopEvent`]s to `handler`.
    pub fn run_once(&mut self, handler: impl FnMut(LoopEvent)) -> Result<(), CoreError> {
        self.event_loop.run_once(&self.routes, handler)
    }

    /// Run until every hosted instance has terminated or
    /// [`Flowtrace::terminate`] is called.
    pub fn run(&mut self, handler: impl FnMut(LoopEvent)) -> Result<(), CoreError> {
        self.event_loop.run(&self.routes, handler)
    }
}
