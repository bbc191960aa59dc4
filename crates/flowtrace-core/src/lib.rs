//! The probing-engine core: configuration, the two probing algorithms
//! (Paris-traceroute and MDA), the hop lattice they build, the algorithm
//! host multiplexing several running instances, and the event loop tying
//! them to [`flowtrace_net`]'s raw sockets.

pub mod algorithm;
pub mod config;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod flow;
pub mod host;
pub mod lattice;
pub mod types;

pub use algorithm::{MdaAlgorithm, TracerouteAlgorithm};
pub use config::{AlgorithmKind, Config, ExplicitTransport, IpFamily, Protocol};
pub use error::{CoreError, Result};
pub use event::{AlgorithmEvent, AlgorithmResult, LoopEvent, MdaEvent, TerminationReason, TracerouteEvent};
pub use event_loop::{EventLoop, InstanceRoute};
pub use flow::FlowPool;
pub use host::{AlgorithmHost, InstanceId};
pub use lattice::{Edge, Lattice, Node};
pub use types::{FlowId, Round, Sequence, TimeToLive, TraceId};
