//! The Multipath Detection Algorithm (C7): per-TTL varied-flow probing with
//! an adaptive stopping rule, building the hop lattice (C8).
//!
//! Each known interface is explored with a two-stage flow: a **confirm**
//! probe at the interface's own TTL establishes that a freshly drawn flow
//! identifier actually traverses that interface; an **explore** probe
//! re-using the same flow identifier one TTL further out observes the
//! next-hop it reaches. Re-using the identifier across the two TTLs is what
//! lets the lattice attribute the next-hop to the correct parent (§4.7).

use super::stopping::stopping_threshold;
use super::{build_probe_packet, ProbeRequest};
use crate::config::{Config, Protocol};
use crate::error::Result;
use crate::event::{AlgorithmResult, MdaEvent, TerminationReason};
use crate::flow::FlowPool;
use crate::lattice::{Lattice, Node};
use crate::types::{FlowId, Sequence, TimeToLive};
use flowtrace_packet::{Address, Family, Reply};
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Confirms a fresh flow traverses this interface, probing at its own TTL.
    Confirm,
    /// Observes the next-hop for a confirmed flow, probing one TTL further.
    Explore,
}

#[derive(Debug, Clone, Copy)]
struct Outstanding {
    interface: usize,
    stage: Stage,
    flow: FlowId,
}

#[derive(Debug)]
struct Interface {
    ttl: TimeToLive,
    node_index: usize,
    /// Next-hop node indices (at `ttl + 1`) discovered so far, deduplicated.
    next_hops: Vec<usize>,
    /// Count of explore-stage flows that resolved (to a known or new
    /// next-hop, star included) — compared against the stopping threshold.
    confirming_flows: u32,
    /// `true` once the root (the source) or already known not to need a
    /// confirm stage.
    is_root: bool,
    explored: bool,
    /// `true` once this interface's own address is the destination; no
    /// children are spawned from it.
    terminal: bool,
}

pub struct MdaAlgorithm {
    source: IpAddr,
    destination: IpAddr,
    protocol: Protocol,
    src_port: u16,
    dst_port: u16,
    max_ttl: u8,
    confidence: f64,
    max_branch: usize,
    family: Family,
    flows: FlowPool,
    lattice: Lattice,
    interfaces: Vec<Interface>,
    /// Interfaces still needing probes issued, in discovery order.
    frontier: Vec<usize>,
    /// Flows confirmed at their interface's TTL, awaiting an explore probe.
    ready_to_explore: Vec<(usize, FlowId)>,
    next_sequence: u32,
    outstanding: HashMap<Sequence, Outstanding>,
    result: Option<AlgorithmResult>,
}

impl MdaAlgorithm {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let family = if config.destination.is_ipv4() { Family::V4 } else { Family::V6 };
        let mut lattice = Lattice::new();
        let root_node = Node::new(Address::from(config.source));
        let root_index = lattice.insert_node(TimeToLive(0), root_node);
        let root = Interface {
            ttl: TimeToLive(0),
            node_index: root_index,
            next_hops: Vec::new(),
            confirming_flows: 0,
            is_root: true,
            explored: false,
            terminal: false,
        };
        Self {
            source: config.source,
            destination: config.destination,
            protocol: config.protocol,
            src_port: config.src_port,
            dst_port: config.dst_port,
            max_ttl: config.max_ttl,
            confidence: config.mda_confidence,
            max_branch: config.mda_max_branch,
            family,
            flows: FlowPool::with_defaults(),
            lattice,
            interfaces: vec![root],
            frontier: vec![0],
            ready_to_explore: Vec::new(),
            next_sequence: 0,
            outstanding: HashMap::new(),
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

    #[must_use]
    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    fn next_sequence(&mut self) -> Sequence {
        let s = Sequence(self.next_sequence);
        self.next_sequence += 1;
        s
    }

    fn build(&self, ttl: TimeToLive, flow: FlowId) -> Result<ProbeRequest> {
        let packet = build_probe_packet(
            self.source,
            self.destination,
            self.protocol,
            self.src_port,
            self.dst_port,
            ttl,
            flow,
        )?;
        Ok(ProbeRequest {
            sequence: Sequence(0), // overwritten by caller before return
            ttl,
            flow_id: flow,
            packet,
        })
    }

    /// Assemble every probe ready to send right now: pending explore-stage
    /// follow-ups first (§4.7's flow re-use), then one fresh confirm-stage
    /// draw per frontier interface still below its stopping threshold. One
    /// draw per call bounds outstanding probes to what the event loop has
    /// already resolved, mirroring the backpressure design of §5.
    pub fn next_probes(&mut self) -> Result<Vec<ProbeRequest>> {
        if self.is_terminated() {
            return Ok(Vec::new());
        }
        let mut requests = Vec::new();

        for (interface, flow) in std::mem::take(&mut self.ready_to_explore) {
            let ttl = TimeToLive(self.interfaces[interface].ttl.0 + 1);
            let mut req = self.build(ttl, flow)?;
            let sequence = self.next_sequence();
            req.sequence = sequence;
            self.outstanding.insert(
                sequence,
                Outstanding { interface, stage: Stage::Explore, flow },
            );
            requests.push(req);
        }

        let frontier = self.frontier.clone();
        for &interface in &frontier {
            if self.interfaces[interface].explored || self.interfaces[interface].terminal {
                continue;
            }
            let n = self.interfaces[interface].next_hops.len() as u32;
            let threshold = stopping_threshold(n.max(1), self.confidence);
            if self.interfaces[interface].confirming_flows >= threshold
                || self.interfaces[interface].next_hops.len() >= self.max_branch
            {
                continue;
            }
            let Some(flow) = self.flows.next_id() else {
                continue;
            };
            if self.interfaces[interface].is_root {
                let ttl = TimeToLive(self.interfaces[interface].ttl.0 + 1);
                let mut req = self.build(ttl, flow)?;
                let sequence = self.next_sequence();
                req.sequence = sequence;
                self.outstanding.insert(
                    sequence,
                    Outstanding { interface, stage: Stage::Explore, flow },
                );
                requests.push(req);
                continue;
            }
            let ttl = self.interfaces[interface].ttl;
            let mut req = self.build(ttl, flow)?;
            let sequence = self.next_sequence();
            req.sequence = sequence;
            self.outstanding.insert(
                sequence,
                Outstanding { interface, stage: Stage::Confirm, flow },
            );
            requests.push(req);
        }
        Ok(requests)
    }

    pub fn on_reply(&mut self, sequence: Sequence, reply: Reply) -> Vec<MdaEvent> {
        let Some(Outstanding { interface, stage, flow }) = self.outstanding.remove(&sequence) else {
            return Vec::new();
        };
        let ttl = self.interfaces[interface].ttl;
        let mut events = vec![MdaEvent::ProbeReply { ttl, sequence, reply: reply.clone() }];
        match stage {
            Stage::Confirm => {
                let expected = self.lattice.node_at(ttl, self.interfaces[interface].node_index).map(|n| n.address);
                if expected == Some(reply.responder) {
                    self.ready_to_explore.push((interface, flow));
                }
            }
            Stage::Explore => {
                events.extend(self.observe_next_hop(interface, flow, reply.responder));
            }
        }
        events
    }

    pub fn on_timeout(&mut self, sequence: Sequence) -> Vec<MdaEvent> {
        let Some(Outstanding { interface, stage, flow }) = self.outstanding.remove(&sequence) else {
            return Vec::new();
        };
        let ttl = self.interfaces[interface].ttl;
        let mut events = vec![MdaEvent::ProbeTimeout { ttl, sequence }];
        if stage == Stage::Explore {
            let star = Node::star(self.family);
            events.extend(self.observe_next_hop_node(interface, flow, star));
        }
        events
    }

    fn observe_next_hop(&mut self, interface: usize, flow: FlowId, responder: Address) -> Vec<MdaEvent> {
        self.observe_next_hop_node(interface, flow, Node::new(responder))
    }

    fn observe_next_hop_node(&mut self, interface: usize, flow: FlowId, node: Node) -> Vec<MdaEvent> {
        let parent_ttl = self.interfaces[interface].ttl;
        let child_ttl = TimeToLive(parent_ttl.0 + 1);
        let is_new_node = !self
            .lattice
            .nodes_at(child_ttl)
            .iter()
            .any(|n| *n == node);
        let child_index = self.lattice.insert_node(child_ttl, node.clone());
        self.lattice.insert_edge(parent_ttl, self.interfaces[interface].node_index, child_index, flow);

        let mut events = Vec::new();
        if is_new_node && !node.is_star() {
            events.push(MdaEvent::NewLink {
                prev_hop: self.lattice.node_at(parent_ttl, self.interfaces[interface].node_index).unwrap().address,
                next_hop: node.address,
                flow_ids: vec![flow],
            });
        }
        if !self.interfaces[interface].next_hops.contains(&child_index) {
            self.interfaces[interface].next_hops.push(child_index);
        }
        self.interfaces[interface].confirming_flows += 1;

        if !node.is_star() && node.address == Address::from(self.destination) {
            self.interfaces[interface].terminal = true;
        }

        self.maybe_explore_complete(interface, child_ttl);
        self.check_global_termination();
        events
    }

    /// Once an interface's stopping threshold is met, spawn its non-star,
    /// non-destination next-hops as new frontier interfaces for the next TTL.
    fn maybe_explore_complete(&mut self, interface: usize, child_ttl: TimeToLive) {
        let n = self.interfaces[interface].next_hops.len() as u32;
        let threshold = stopping_threshold(n.max(1), self.confidence);
        let done = self.interfaces[interface].confirming_flows >= threshold
            || self.interfaces[interface].next_hops.len() >= self.max_branch;
        if !done || self.interfaces[interface].explored {
            return;
        }
        self.interfaces[interface].explored = true;
        if self.interfaces[interface].terminal || child_ttl.0 >= self.max_ttl {
            return;
        }
        let next_hops = self.interfaces[interface].next_hops.clone();
        for child_index in next_hops {
            let Some(node) = self.lattice.node_at(child_ttl, child_index).cloned() else {
                continue;
            };
            if node.is_star() {
                continue;
            }
            let already = self
                .interfaces
                .iter()
                .any(|i| i.ttl == child_ttl && i.node_index == child_index);
            if already {
                continue;
            }
            let terminal = node.address == Address::from(self.destination);
            self.interfaces.push(Interface {
                ttl: child_ttl,
                node_index: child_index,
                next_hops: Vec::new(),
                confirming_flows: 0,
                is_root: false,
                explored: false,
                terminal,
            });
            self.frontier.push(self.interfaces.len() - 1);
        }
    }

    fn check_global_termination(&mut self) {
        if self.is_terminated() {
            return;
        }
        let all_terminal = self
            .interfaces
            .iter()
            .all(|i| i.explored && (i.terminal || i.next_hops.is_empty() || i.ttl.0 + 1 >= self.max_ttl));
        if all_terminal {
            self.result = Some(AlgorithmResult {
                reason: if self.interfaces.iter().any(|i| i.terminal) {
                    TerminationReason::DestinationReached
                } else {
                    TerminationReason::HopLimitExceeded
                },
                lattice: Some(self.lattice.clone()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlgorithmKind;
    use flowtrace_packet::probe::{MatchingKey, ReplyClassification};
    use std::time::SystemTime;

    fn config() -> Config {
        Config::new(
            "10.0.0.2".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
            Protocol::Udp,
            AlgorithmKind::Mda,
        )
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

    fn reply(responder: Address) -> Reply {
        Reply::new(responder, ReplyClassification::TimeExceeded, SystemTime::now(), fake_key())
    }

    #[test]
    fn root_interface_skips_confirm_stage() {
        let mut algo = MdaAlgorithm::new(&config());
        let requests = algo.next_probes().unwrap();
        assert!(!requests.is_empty());
        assert_eq!(requests[0].ttl, TimeToLive(1));
    }

    #[test]
    fn discovering_a_new_next_hop_emits_new_link() {
        let mut algo = MdaAlgorithm::new(&config());
        let requests = algo.next_probes().unwrap();
        let hop = Address::V4([10, 0, 0, 9]);
        let events = algo.on_reply(requests[0].sequence, reply(hop));
        assert!(events.iter().any(|e| matches!(e, MdaEvent::NewLink { .. })));
    }

    #[test]
    fn timeout_inserts_star_node() {
        let mut algo = MdaAlgorithm::new(&config());
        let requests = algo.next_probes().unwrap();
        algo.on_timeout(requests[0].sequence);
        let nodes = algo.lattice().nodes_at(TimeToLive(1));
        assert!(nodes.iter().any(Node::is_star));
    }
}
