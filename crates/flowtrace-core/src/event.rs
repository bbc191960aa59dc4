//! Event types flowing upward from the probing engine to the user handler
//! (§4.4, §6): per-probe events from an algorithm, and the loop-level
//! envelope that fans them out.

use crate::host::InstanceId;
use crate::lattice::Lattice;
use crate::types::{FlowId, Sequence, TimeToLive};
use flowtrace_packet::{Address, MatchingKey, Reply};

/// A probe-level event produced by the traceroute algorithm (C6).
#[derive(Debug, Clone)]
pub enum TracerouteEvent {
    ProbeReply {
        ttl: TimeToLive,
        sequence: Sequence,
        reply: Reply,
    },
    ProbeTimeout {
        ttl: TimeToLive,
        sequence: Sequence,
    },
}

/// A probe- or lattice-level event produced by the MDA algorithm (C7).
#[derive(Debug, Clone)]
pub enum MdaEvent {
    ProbeReply {
        ttl: TimeToLive,
        sequence: Sequence,
        reply: Reply,
    },
    ProbeTimeout {
        ttl: TimeToLive,
        sequence: Sequence,
    },
    NewLink {
        prev_hop: Address,
        next_hop: Address,
        flow_ids: Vec<FlowId>,
    },
}

/// The sum type over every algorithm's event, replacing the source's
/// dispatch-by-string-name (§9 Design Notes).
#[derive(Debug, Clone)]
pub enum AlgorithmEvent {
    Traceroute(TracerouteEvent),
    Mda(MdaEvent),
}

impl From<TracerouteEvent> for AlgorithmEvent {
    fn from(e: TracerouteEvent) -> Self {
        Self::Traceroute(e)
    }
}

impl From<MdaEvent> for AlgorithmEvent {
    fn from(e: MdaEvent) -> Self {
        Self::Mda(e)
    }
}

/// Why an algorithm instance stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The destination address replied (by address, or a reached-indicating
    /// classification).
    DestinationReached,
    /// `max_ttl` was probed without reaching the destination.
    HopLimitExceeded,
    /// The loop was asked to terminate mid-run.
    Interrupted,
}

/// The final outcome of an algorithm instance, delivered with
/// `ALGORITHM_HAS_TERMINATED`.
#[derive(Debug, Clone)]
pub struct AlgorithmResult {
    pub reason: TerminationReason,
    /// Populated only for MDA instances; `None` for plain traceroute.
    pub lattice: Option<Lattice>,
}

/// The event delivered to the user handler, wrapping either an in-progress
/// algorithm event or a terminal result, tagged by the instance it came
/// from (§4.5: instances share one loop).
#[derive(Debug, Clone)]
pub enum LoopEvent {
    Algorithm {
        instance: InstanceId,
        event: AlgorithmEvent,
    },
    Terminated {
        instance: InstanceId,
        result: AlgorithmResult,
    },
    /// A newly-sent probe's matching key collided with one already
    /// outstanding. The older probe keeps the key (oldest match wins); the
    /// newer one is sent but can never be matched to a reply and will
    /// eventually time out.
    MatchCollision {
        key: MatchingKey,
    },
}
