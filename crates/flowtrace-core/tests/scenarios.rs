//! End-to-end scenarios against `AlgorithmHost` directly (§8). `AlgorithmHost`
//! has no socket dependency of its own, so these drive it with synthetic
//! `Reply`/timeout values standing in for a simulated network, without a raw
//! socket or elevated privileges.

use flowtrace_core::{
    AlgorithmEvent, AlgorithmKind, AlgorithmHost, Config, LoopEvent, MdaEvent, Protocol,
    TerminationReason, TimeToLive,
};
use flowtrace_packet::{Address, MatchingKey, Reply, ReplyClassification};
use std::net::IpAddr;
use std::time::SystemTime;

fn fake_key(src: IpAddr, dst: IpAddr) -> MatchingKey {
    let (src, dst) = match (src, dst) {
        (IpAddr::V4(s), IpAddr::V4(d)) => (Address::V4(s.octets()), Address::V4(d.octets())),
        _ => panic!("scenarios only exercise v4 addresses"),
    };
    MatchingKey {
        src,
        dst,
        ip_protocol: 17,
        ip_id_or_flow_label: 0,
        transport_first8: [0; 8],
    }
}

fn reply(source: IpAddr, destination: IpAddr, responder: Address, classification: ReplyClassification) -> Reply {
    Reply::new(responder, classification, SystemTime::now(), fake_key(source, destination))
}

/// A straight, unobstructed path: every hop replies in order and the
/// destination is reached before `max_ttl`.
#[test]
fn traceroute_reaches_destination_along_a_clean_path() {
    let source: IpAddr = "10.0.0.2".parse().unwrap();
    let destination: IpAddr = "10.0.0.5".parse().unwrap();
    let mut config = Config::new(source, destination, Protocol::Udp, AlgorithmKind::ParisTraceroute);
    config.max_ttl = 5;
    config.num_probes = 1;

    let hops = [
        Address::V4([10, 0, 0, 3]),
        Address::V4([10, 0, 0, 4]),
        Address::V4([10, 0, 0, 5]),
    ];

    let mut host = AlgorithmHost::new();
    let id = host.add(&config);

    let mut reached = false;
    for hop in hops {
        let probes = host.poll_probes().unwrap();
        assert_eq!(probes.len(), 1, "one probe per ttl with num_probes=1");
        let (instance, req) = &probes[0];
        let classification = if hop == Address::from(destination) {
            ReplyClassification::DestinationUnreachablePort
        } else {
            ReplyClassification::TimeExceeded
        };
        let events = host.deliver_reply(*instance, req.sequence, reply(source, destination, hop, classification));
        if events
            .iter()
            .any(|e| matches!(e, LoopEvent::Terminated { instance: i, result } if *i == id && result.reason == TerminationReason::DestinationReached))
        {
            reached = true;
            break;
        }
    }
    assert!(reached, "destination reply must terminate the instance");
    assert!(host.all_terminated());
}

/// One hop along the path never answers; the instance must time it out,
/// keep advancing, and still terminate once the destination replies.
#[test]
fn traceroute_times_out_an_unresponsive_hop_and_continues() {
    let source: IpAddr = "10.0.0.2".parse().unwrap();
    let destination: IpAddr = "10.0.0.9".parse().unwrap();
    let mut config = Config::new(source, destination, Protocol::Udp, AlgorithmKind::ParisTraceroute);
    config.max_ttl = 4;
    config.num_probes = 1;

    let mut host = AlgorithmHost::new();
    let id = host.add(&config);

    // ttl 1: replies normally.
    let probes = host.poll_probes().unwrap();
    let (instance, req) = &probes[0];
    let events = host.deliver_reply(
        *instance,
        req.sequence,
        reply(source, destination, Address::V4([10, 0, 0, 3]), ReplyClassification::TimeExceeded),
    );
    assert!(!events.iter().any(|e| matches!(e, LoopEvent::Terminated { .. })));

    // ttl 2: silent hop, times out.
    let probes = host.poll_probes().unwrap();
    let (instance, req) = &probes[0];
    let events = host.deliver_timeout(*instance, req.sequence);
    assert!(events.iter().any(|e| matches!(
        e,
        LoopEvent::Algorithm { event: AlgorithmEvent::Traceroute(_), .. }
    )));
    assert!(!events.iter().any(|e| matches!(e, LoopEvent::Terminated { .. })));

    // ttl 3: replies normally.
    let probes = host.poll_probes().unwrap();
    let (instance, req) = &probes[0];
    host.deliver_reply(
        *instance,
        req.sequence,
        reply(source, destination, Address::V4([10, 0, 0, 4]), ReplyClassification::TimeExceeded),
    );

    // ttl 4: the destination answers.
    let probes = host.poll_probes().unwrap();
    let (instance, req) = &probes[0];
    let events = host.deliver_reply(
        *instance,
        req.sequence,
        reply(source, destination, Address::from(destination), ReplyClassification::DestinationUnreachablePort),
    );
    assert!(events.iter().any(|e| matches!(
        e,
        LoopEvent::Terminated { instance: i, result } if *i == id && result.reason == TerminationReason::DestinationReached
    )));
}

/// A root interface whose flows split across two load-balanced next-hops:
/// the lattice must attribute both as distinct links from the source before
/// exploration moves on.
///
/// `mda_confidence` is set far looser than the production default (0.05) so
/// the stopping threshold stays small (`k(1)=2`, `k(2)=3` instead of `6`/`11`)
/// and the scenario stays a handful of probes instead of dozens.
#[test]
fn mda_splits_a_load_balanced_root_into_two_next_hops() {
    let source: IpAddr = "10.0.0.2".parse().unwrap();
    let destination: IpAddr = "10.0.0.99".parse().unwrap();
    let mut config = Config::new(source, destination, Protocol::Udp, AlgorithmKind::Mda);
    config.max_ttl = 5;
    config.mda_confidence = 0.9;

    let hop_a = Address::V4([10, 0, 0, 10]);
    let hop_b = Address::V4([10, 0, 0, 11]);

    let mut host = AlgorithmHost::new();
    let id = host.add(&config);

    let mut new_links = Vec::new();
    // The flow pool issues 1, 2, 3, ... in order; splitting on parity
    // reproduces a two-way load balancer deterministically.
    for _ in 0..3 {
        let probes = host.poll_probes().unwrap();
        assert_eq!(probes.len(), 1, "root explores one flow per call");
        let (instance, req) = &probes[0];
        assert_eq!(req.ttl, TimeToLive(1), "root skips the confirm stage");
        let responder = if req.flow_id.0 % 2 == 1 { hop_a } else { hop_b };
        let events = host.deliver_reply(
            *instance,
            req.sequence,
            reply(source, destination, responder, ReplyClassification::TimeExceeded),
        );
        for event in events {
            if let LoopEvent::Algorithm { instance: i, event: AlgorithmEvent::Mda(MdaEvent::NewLink { next_hop, .. }) } = event {
                assert_eq!(i, id);
                new_links.push(next_hop);
            }
        }
    }

    assert_eq!(new_links.len(), 2, "exactly two distinct next-hops should be new");
    assert!(new_links.contains(&hop_a));
    assert!(new_links.contains(&hop_b));

    // The root interface's threshold (k(2) = 3 confirming flows) is now met,
    // so it should have spawned confirm-stage probes for both next-hops.
    let probes = host.poll_probes().unwrap();
    assert_eq!(probes.len(), 2, "both split interfaces should now be on the frontier");
    assert!(probes.iter().all(|(_, req)| req.ttl == TimeToLive(1)));
}
