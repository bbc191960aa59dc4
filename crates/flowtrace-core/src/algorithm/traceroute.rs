//! The Paris-traceroute algorithm (C6): constant-flow probing per TTL.
//!
//! One state machine per `TimeToLive` *k* from 1 to `max_ttl`: INIT sends
//! `num_probes` probes all sharing one flow identifier, WAIT collects every
//! reply/timeout for *k*, CLASSIFY decides whether the destination was
//! reached or probing continues to *k+1*.

use super::{build_probe_packet, ProbeRequest};
use crate::config::{Config, Protocol};
use crate::error::Result;
use crate::event::{AlgorithmResult, TerminationReason, TracerouteEvent};
use crate::flow::FlowPool;
use crate::types::{FlowId, Sequence, TimeToLive};
use flowtrace_packet::{Address, Reply};
use std::collections::HashSet;
use std::net::IpAddr;

pub struct TracerouteAlgorithm {
    source: IpAddr,
    destination: IpAddr,
    protocol: Protocol,
    src_port: u16,
    dst_port: u16,
    max_ttl: u8,
    num_probes: u32,
    /// Fixed for the whole run: Paris-traceroute's defining invariant is that
    /// every probe at every TTL carries the same flow identifier.
    flow_id: FlowId,
    current_ttl: u8,
    ttl_started: bool,
    next_sequence: u32,
    outstanding: HashSet<Sequence>,
    destination_reached: bool,
    result: Option<AlgorithmResult>,
}

impl TracerouteAlgorithm {
    /// Build a new instance, drawing the one fixed flow identifier for the
    /// whole run from a single-shot [`FlowPool`].
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let mut pool = FlowPool::with_defaults();
        let flow_id = pool.next_id().unwrap_or(FlowId(1));
        Self {
            source: config.source,
            destination: config.destination,
            protocol: config.protocol,
            src_port: config.src_port,
            dst_port: config.dst_port,
            max_ttl: config.max_ttl,
            num_probes: config.num_probes,
            flow_id,
            current_ttl: 1,
            ttl_started: false,
            next_sequence: 0,
            outstanding: HashSet::new(),
            destination_reached: false,
            result: None,
        }
    }

    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        self.result.is_some()
    }

    #[must_use]
    pub fn result(&self) -> Option<&AlgorithmResult> {
        self.result.as_ref()
    }

    /// If the current TTL hasn't been started yet, assemble and return its
    /// `num_probes` probe requests (INIT). Returns an empty vector while
    /// waiting on outstanding probes, or once terminated.
    pub fn next_probes(&mut self) -> Result<Vec<ProbeRequest>> {
        if self.is_terminated() || self.ttl_started {
            return Ok(Vec::new());
        }
        self.ttl_started = true;
        let ttl = TimeToLive(self.current_ttl);
        let mut requests = Vec::with_capacity(self.num_probes as usize);
        for _ in 0..self.num_probes {
            let sequence = Sequence(self.next_sequence);
            self.next_sequence += 1;
            let packet = build_probe_packet(
                self.source,
                self.destination,
                self.protocol,
                self.src_port,
                self.dst_port,
                ttl,
                self.flow_id,
            )?;
            self.outstanding.insert(sequence);
            requests.push(ProbeRequest {
                sequence,
                ttl,
                flow_id: self.flow_id,
                packet,
            });
        }
        Ok(requests)
    }

    /// WAIT: a reply arrived for `sequence`.
    pub fn on_reply(&mut self, sequence: Sequence, reply: Reply) -> Vec<TracerouteEvent> {
        if !self.outstanding.remove(&sequence) {
            return Vec::new();
        }
        if reply.classification.is_destination_reached()
            || reply.responder == Address::from(self.destination)
        {
            self.destination_reached = true;
        }
        let ttl = TimeToLive(self.current_ttl);
        let mut events = vec![TracerouteEvent::ProbeReply { ttl, sequence, reply }];
        events.extend(self.classify_if_ttl_complete());
        events
    }

    /// WAIT: `sequence` timed out without a reply.
    pub fn on_timeout(&mut self, sequence: Sequence) -> Vec<TracerouteEvent> {
        if !self.outstanding.remove(&sequence) {
            return Vec::new();
        }
        let ttl = TimeToLive(self.current_ttl);
        let mut events = vec![TracerouteEvent::ProbeTimeout { ttl, sequence }];
        events.extend(self.classify_if_ttl_complete());
        events
    }

    /// CLASSIFY: once every probe at the current TTL has either replied or
    /// timed out, decide whether to terminate or advance to *k+1*. Returns
    /// no events itself; termination is observed via [`Self::is_terminated`].
    fn classify_if_ttl_complete(&mut self) -> Vec<TracerouteEvent> {
        if !self.outstanding.is_empty() {
            return Vec::new();
        }
        if self.destination_reached {
            self.result = Some(AlgorithmResult {
                reason: TerminationReason::DestinationReached,
                lattice: None,
            });
        } else if self.current_ttl >= self.max_ttl {
            self.result = Some(AlgorithmResult {
                reason: TerminationReason::HopLimitExceeded,
                lattice: None,
            });
        } else {
            self.current_ttl += 1;
            self.ttl_started = false;
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlgorithmKind;
    use crate::event::TerminationReason;
    use flowtrace_packet::probe::{MatchingKey, ReplyClassification};
    use std::time::SystemTime;

    fn config(max_ttl: u8, num_probes: u32) -> Config {
        let mut c = Config::new(
            "10.0.0.2".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
            Protocol::Udp,
            AlgorithmKind::ParisTraceroute,
        );
        c.max_ttl = max_ttl;
        c.num_probes = num_probes;
        c
    }

    fn fake_key() -> MatchingKey {
        MatchingKey {
            src: Address::V4([10, 0, 0, 2]),
            dst: Address::V4([10, 0, 0, 5]),
            ip_protocol: 17,
            ip_id_or_flow_label: 0,
            transport_first8: [0; 8],
        }
    }

    fn fake_reply(responder: Address, classification: ReplyClassification) -> Reply {
        Reply::new(responder, classification, SystemTime::now(), fake_key())
    }

    #[test]
    fn all_probes_at_a_ttl_share_one_flow_id() {
        let mut algo = TracerouteAlgorithm::new(&config(5, 3));
        let requests = algo.next_probes().unwrap();
        assert_eq!(requests.len(), 3);
        let ids: HashSet<_> = requests.iter().map(|r| r.flow_id).collect();
        assert_eq!(ids.len(), 1, "Paris mode requires one flow id per TTL");
    }

    #[test]
    fn advances_ttl_after_all_probes_resolve() {
        let mut algo = TracerouteAlgorithm::new(&config(5, 2));
        let requests = algo.next_probes().unwrap();
        let mid = Address::V4([10, 0, 0, 9]);
        algo.on_reply(requests[0].sequence, fake_reply(mid, ReplyClassification::TimeExceeded));
        algo.on_timeout(requests[1].sequence);
        assert!(!algo.is_terminated());
        let next = algo.next_probes().unwrap();
        assert_eq!(next[0].ttl, TimeToLive(2));
    }

    #[test]
    fn terminates_on_destination_reached() {
        let mut algo = TracerouteAlgorithm::new(&config(30, 1));
        let requests = algo.next_probes().unwrap();
        let dest = Address::V4([10, 0, 0, 5]);
        algo.on_reply(
            requests[0].sequence,
            fake_reply(dest, ReplyClassification::DestinationUnreachablePort),
        );
        assert!(algo.is_terminated());
        assert_eq!(
            algo.result().unwrap().reason,
            TerminationReason::DestinationReached
        );
    }

    #[test]
    fn exhausts_at_max_ttl_without_reply() {
        let mut algo = TracerouteAlgorithm::new(&config(1, 1));
        let requests = algo.next_probes().unwrap();
        algo.on_timeout(requests[0].sequence);
        assert!(algo.is_terminated());
        assert_eq!(
            algo.result().unwrap().reason,
            TerminationReason::HopLimitExceeded
        );
    }

    #[test]
    fn never_retries_a_lost_probe_beyond_num_probes() {
        let mut algo = TracerouteAlgorithm::new(&config(5, 3));
        let requests = algo.next_probes().unwrap();
        assert_eq!(requests.len(), 3);
        for r in &requests {
            algo.on_timeout(r.sequence);
        }
        let next = algo.next_probes().unwrap();
        assert_eq!(next.len(), 3, "moved on to ttl 2 with a fresh budget, not a retry");
    }
}
