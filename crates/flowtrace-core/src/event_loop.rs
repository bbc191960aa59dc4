//! The event loop (C4): single-threaded, cooperative, driving the shared
//! raw-socket I/O and per-probe timers for every algorithm instance hosted
//! by a [`AlgorithmHost`].
//!
//! One iteration does exactly what §4.4 prescribes: compute the next
//! deadline, wait on I/O-or-timer, drain ready I/O into `PROBE_REPLY`
//! events, fire timer expirations into `PROBE_TIMEOUT` events, drain each
//! instance's resulting higher-level events to the user handler, then
//! process control messages. Within one iteration, replies precede
//! timeouts, which precede the events derived from them.

use crate::config::{Config, Protocol};
use crate::error::{CoreError, Result};
use crate::event::LoopEvent;
use crate::host::{AlgorithmHost, InstanceId};
use crate::types::Sequence;
use flowtrace_net::{NetError, Pacer, RawSender, RawSniffer, TimerId, TimerWheel};
use flowtrace_packet::probe::MatchingKey;
use flowtrace_packet::Family;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Upper bound on how long a single poll wait blocks when no timer is
/// pending, so a loop with no outstanding probes still notices
/// [`EventLoop::terminate`] promptly.
const MAX_POLL_WAIT: Duration = Duration::from_secs(1);

fn ip_protocol_number(protocol: Protocol, family: Family) -> i32 {
    match (protocol, family) {
        (Protocol::Udp, _) => 17,
        (Protocol::Tcp, _) => 6,
        (Protocol::Icmp, Family::V4) => 1,
        (Protocol::Icmp, Family::V6) => 58,
    }
}

fn family_of(addr: IpAddr) -> Family {
    if addr.is_ipv4() {
        Family::V4
    } else {
        Family::V6
    }
}

struct OutstandingProbe {
    instance: InstanceId,
    sequence: Sequence,
    timer: TimerId,
}

/// Everything the event loop needs to route an instance's probes and
/// schedule their timeouts, kept outside [`AlgorithmHost`] since it's
/// transport routing, not algorithm state.
#[derive(Debug, Clone, Copy)]
pub struct InstanceRoute {
    pub protocol: Protocol,
    pub destination: IpAddr,
    pub per_probe_timeout: Duration,
}

impl InstanceRoute {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            protocol: config.protocol,
            destination: config.destination,
            per_probe_timeout: config.per_probe_timeout,
        }
    }
}

/// The single-threaded cooperative event loop: owns the raw sockets, the
/// timer wheel, global pacing, and the [`AlgorithmHost`] registry.
pub struct EventLoop {
    host: AlgorithmHost,
    senders: HashMap<(Family, i32), RawSender>,
    sniffers: HashMap<Family, RawSniffer>,
    /// Raw TCP sniffers, opened alongside `sniffers` only for instances
    /// tracing over TCP, to catch a destination's direct reset/syn-ack.
    tcp_sniffers: HashMap<Family, RawSniffer>,
    timers: TimerWheel<(InstanceId, Sequence)>,
    pacer: Pacer,
    outstanding: HashMap<MatchingKey, OutstandingProbe>,
    /// Index from the reduced key a destination's direct reply (ICMP echo
    /// reply, TCP reset/syn-ack) would present, back to the exact key it was
    /// sent under in `outstanding`. Populated alongside `outstanding` and
    /// cleaned up together, since a probe can only be matched once.
    direct_reply_keys: HashMap<MatchingKey, MatchingKey>,
    terminate_requested: bool,
}

impl EventLoop {
    /// Create a loop with `min_inter_send` applied globally across every
    /// instance it hosts (§4.3).
    #[must_use]
    pub fn new(min_inter_send: Duration) -> Self {
        Self {
            host: AlgorithmHost::new(),
            senders: HashMap::new(),
            sniffers: HashMap::new(),
            tcp_sniffers: HashMap::new(),
            timers: TimerWheel::new(),
            pacer: Pacer::new(min_inter_send),
            outstanding: HashMap::new(),
            direct_reply_keys: HashMap::new(),
            terminate_requested: false,
        }
    }

    fn sender_for(&mut self, protocol: Protocol, family: Family) -> Result<&mut RawSender> {
        let proto_num = ip_protocol_number(protocol, family);
        if !self.senders.contains_key(&(family, proto_num)) {
            let sender = RawSender::new(family, proto_num)?;
            self.senders.insert((family, proto_num), sender);
        }
        Ok(self.senders.get_mut(&(family, proto_num)).expect("just inserted"))
    }

    fn sniffer_for(&mut self, family: Family) -> Result<&mut RawSniffer> {
        if !self.sniffers.contains_key(&family) {
            self.sniffers.insert(family, RawSniffer::new(family)?);
        }
        Ok(self.sniffers.get_mut(&family).expect("just inserted"))
    }

    fn tcp_sniffer_for(&mut self, family: Family) -> Result<&mut RawSniffer> {
        if !self.tcp_sniffers.contains_key(&family) {
            self.tcp_sniffers.insert(family, RawSniffer::new_tcp(family)?);
        }
        Ok(self.tcp_sniffers.get_mut(&family).expect("just inserted"))
    }

    /// Add an algorithm instance to the loop, eagerly opening the raw
    /// sockets its protocol/family need. TCP instances also get a raw TCP
    /// sniffer, since a destination's reset/syn-ack never arrives on the
    /// ICMP socket.
    pub fn add_instance(&mut self, config: &Config) -> Result<InstanceId> {
        let family = family_of(config.destination);
        self.sender_for(config.protocol, family)?;
        self.sniffer_for(family)?;
        if config.protocol == Protocol::Tcp {
            self.tcp_sniffer_for(family)?;
        }
        Ok(self.host.add(config))
    }

    pub fn stop_instance(&mut self, id: InstanceId) {
        self.host.stop(id);
    }

    /// Request termination: the current iteration finishes, every instance
    /// is torn down in reverse insertion order, and [`EventLoop::run`]
    /// returns.
    pub fn terminate(&mut self) {
        self.terminate_requested = true;
    }

    /// Send every probe the host's instances are ready to issue, respecting
    /// global pacing (probes the pacer defers are simply skipped this
    /// iteration; the instance will re-offer them next time `poll_probes`
    /// runs, since it never marked them sent).
    ///
    /// A new probe is sent regardless of whether its matching key collides
    /// with one already outstanding — both still consume a timer and a
    /// sequence — but on collision the older probe keeps the key (oldest
    /// match wins): the new one is registered nowhere and can only ever time
    /// out, and a diagnostic is emitted via both `tracing::warn!` and a
    /// [`LoopEvent::MatchCollision`].
    fn dispatch_sends(&mut self, instances: &HashMap<InstanceId, InstanceRoute>) -> Result<Vec<LoopEvent>> {
        let mut collisions = Vec::new();
        let ready = self.host.poll_probes()?;
        for (instance, probe) in ready {
            let now = Instant::now();
            if self.pacer.poll(now).is_err() {
                continue;
            }
            let Some(route) = instances.get(&instance) else {
                continue;
            };
            let family = family_of(route.destination);
            let key = MatchingKey::from_packet(&probe.packet).ok_or(CoreError::Protocol(
                flowtrace_packet::PacketError::NoFlowCarryingLayer,
            ))?;
            let sender = self.sender_for(route.protocol, family)?;
            let sent_at = sender.send(route.destination, probe.packet.as_bytes())?;
            self.pacer.record_send(sent_at);
            let timer = self.timers.schedule_after(route.per_probe_timeout, (instance, probe.sequence));
            if self.outstanding.contains_key(&key) {
                tracing::warn!(?key, "matching key collision, keeping oldest outstanding probe");
                collisions.push(LoopEvent::MatchCollision { key });
                continue;
            }
            if let Some(direct_key) = key.direct_reply_key() {
                self.direct_reply_keys.insert(direct_key, key);
            }
            self.outstanding.insert(key, OutstandingProbe { instance, sequence: probe.sequence, timer });
        }
        Ok(collisions)
    }

    /// Block until either a sniffer socket is readable or the next timer
    /// deadline passes, whichever comes first (§4.4 step 2). Multiplexed
    /// with `nix::poll` rather than a hand-rolled `select`.
    fn wait_for_io_or_timeout(&self) -> Result<()> {
        let wait = self
            .timers
            .next_deadline()
            .unwrap_or(MAX_POLL_WAIT)
            .min(MAX_POLL_WAIT);
        let millis = u16::try_from(wait.as_millis()).unwrap_or(u16::MAX);
        let timeout = PollTimeout::from(millis);
        if self.sniffers.is_empty() && self.tcp_sniffers.is_empty() {
            std::thread::sleep(wait);
            return Ok(());
        }
        let mut pollfds: Vec<PollFd> = self
            .sniffers
            .values()
            .chain(self.tcp_sniffers.values())
            .map(|sniffer| PollFd::new(sniffer.as_fd(), PollFlags::POLLIN))
            .collect();
        poll(&mut pollfds, timeout).map_err(|e| NetError::Io(std::io::Error::from(e)))?;
        Ok(())
    }

    /// Drain every pending datagram on every open ICMP/TCP sniffer, matching
    /// each to its outstanding probe and delivering a `PROBE_REPLY`.
    ///
    /// A reply's own matching key is tried against `outstanding` first (the
    /// Time-Exceeded/Destination-Unreachable path, keyed on the quoted
    /// original packet); if that misses, the reply's key is looked up in
    /// `direct_reply_keys` to recover the exact key a destination's echo
    /// reply or TCP reset/syn-ack was sent under.
    fn drain_replies(&mut self) -> Result<Vec<LoopEvent>> {
        let mut events = Vec::new();
        let mut matched = Vec::new();
        for sniffer in self.sniffers.values_mut().chain(self.tcp_sniffers.values_mut()) {
            sniffer.drain(|reply| matched.push(reply))?;
        }
        for reply in matched {
            let exact = self.outstanding.contains_key(&reply.matching_key);
            let key = if exact {
                Some(reply.matching_key)
            } else {
                self.direct_reply_keys.get(&reply.matching_key).copied()
            };
            if let Some(key) = key {
                if let Some(probe) = self.outstanding.remove(&key) {
                    self.timers.cancel(probe.timer);
                    if let Some(direct_key) = key.direct_reply_key() {
                        self.direct_reply_keys.remove(&direct_key);
                    }
                    events.extend(self.host.deliver_reply(probe.instance, probe.sequence, reply));
                    continue;
                }
            }
            tracing::debug!("dropped reply with no matching outstanding probe");
        }
        Ok(events)
    }

    /// Fire every timer whose deadline has passed, delivering `PROBE_TIMEOUT`.
    fn drain_timeouts(&mut self) -> Vec<LoopEvent> {
        let mut events = Vec::new();
        for (instance, sequence) in self.timers.pop_expired() {
            let mut expired_key = None;
            self.outstanding.retain(|key, p| {
                let expired = p.instance == instance && p.sequence == sequence;
                if expired {
                    expired_key = Some(*key);
                }
                !expired
            });
            if let Some(key) = expired_key.and_then(|k| k.direct_reply_key()) {
                self.direct_reply_keys.remove(&key);
            }
            events.extend(self.host.deliver_timeout(instance, sequence));
        }
        events
    }

    /// Run one iteration, dispatching resulting [`LoopEvent`]s to `handler`.
    /// `routes` is consulted to address sends and size their timeouts; a
    /// caller maintains it alongside [`AlgorithmHost::add`]/[`EventLoop::add_instance`].
    pub fn run_once(
        &mut self,
        routes: &HashMap<InstanceId, InstanceRoute>,
        mut handler: impl FnMut(LoopEvent),
    ) -> Result<()> {
        for event in self.dispatch_sends(routes)? {
            handler(event);
        }
        self.wait_for_io_or_timeout()?;
        for event in self.drain_replies()? {
            handler(event);
        }
        for event in self.drain_timeouts() {
            handler(event);
        }
        Ok(())
    }

    /// Run until every hosted instance has terminated or [`EventLoop::terminate`]
    /// is called, dispatching events to `handler` as they occur.
    pub fn run(
        &mut self,
        routes: &HashMap<InstanceId, InstanceRoute>,
        mut handler: impl FnMut(LoopEvent),
    ) -> Result<()> {
        loop {
            if self.terminate_requested {
                self.host.teardown_all();
                return Err(CoreError::LoopInterrupted);
            }
            self.run_once(routes, &mut handler)?;
            if self.host.all_terminated() {
                self.host.teardown_all();
                return Ok(());
            }
        }
    }
}
