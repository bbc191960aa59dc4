//! The algorithm host (C5): a registry of running algorithm instances
//! sharing one event loop. Adding an instance returns a handle; stopping it
//! tears it down; removing deletes its queue. Instances are torn down in
//! reverse insertion order on loop termination (§4.4).

use crate::algorithm::{MdaAlgorithm, ProbeRequest, TracerouteAlgorithm};
use crate::config::{AlgorithmKind, Config};
use crate::error::Result;
use crate::event::{AlgorithmEvent, AlgorithmResult, LoopEvent};
use crate::types::Sequence;
use flowtrace_packet::Reply;

/// Opaque handle to a running algorithm instance, unique for the lifetime of
/// the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

enum Running {
    Traceroute(TracerouteAlgorithm),
    Mda(MdaAlgorithm),
}

impl Running {
    fn next_probes(&mut self) -> Result<Vec<ProbeRequest>> {
        match self {
            Self::Traceroute(a) => a.next_probes(),
            Self::Mda(a) => a.next_probes(),
        }
    }

    fn on_reply(&mut self, sequence: Sequence, reply: Reply) -> Vec<AlgorithmEvent> {
        match self {
            Self::Traceroute(a) => a.on_reply(sequence, reply).into_iter().map(Into::into).collect(),
            Self::Mda(a) => a.on_reply(sequence, reply).into_iter().map(Into::into).collect(),
        }
    }

    fn on_timeout(&mut self, sequence: Sequence) -> Vec<AlgorithmEvent> {
        match self {
            Self::Traceroute(a) => a.on_timeout(sequence).into_iter().map(Into::into).collect(),
            Self::Mda(a) => a.on_timeout(sequence).into_iter().map(Into::into).collect(),
        }
    }

    fn is_terminated(&self) -> bool {
        match self {
            Self::Traceroute(a) => a.is_terminated(),
            Self::Mda(a) => a.is_terminated(),
        }
    }

    fn result(&self) -> Option<AlgorithmResult> {
        match self {
            Self::Traceroute(a) => a.result().cloned(),
            Self::Mda(a) => a.result().cloned(),
        }
    }
}

struct Instance {
    id: InstanceId,
    running: Running,
    stopped: bool,
}

/// The registry of running instances, keyed by [`InstanceId`] but iterated
/// in insertion order so termination can stop instances in reverse.
#[derive(Default)]
pub struct AlgorithmHost {
    instances: Vec<Instance>,
    next_id: u64,
}

impl AlgorithmHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate the algorithm named by `config.algorithm` and add it to
    /// the host, returning a handle.
    pub fn add(&mut self, config: &Config) -> InstanceId {
        let running = match config.algorithm {
            AlgorithmKind::ParisTraceroute => Running::Traceroute(TracerouteAlgorithm::new(config)),
            AlgorithmKind::Mda => Running::Mda(MdaAlgorithm::new(config)),
        };
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        self.instances.push(Instance { id, running, stopped: false });
        id
    }

    /// Mark an instance stopped; its queue is left in place until
    /// [`AlgorithmHost::remove`] is called, matching §4.5's add/stop/remove
    /// split.
    pub fn stop(&mut self, id: InstanceId) {
        if let Some(instance) = self.instances.iter_mut().find(|i| i.id == id) {
            instance.stopped = true;
        }
    }

    pub fn remove(&mut self, id: InstanceId) {
        self.instances.retain(|i| i.id != id);
    }

    /// Every probe every non-stopped, non-terminated instance wants sent
    /// right now, tagged with its owning instance.
    pub fn poll_probes(&mut self) -> Result<Vec<(InstanceId, ProbeRequest)>> {
        let mut out = Vec::new();
        for instance in &mut self.instances {
            if instance.stopped || instance.running.is_terminated() {
                continue;
            }
            for probe in instance.running.next_probes()? {
                out.push((instance.id, probe));
            }
        }
        Ok(out)
    }

    /// Deliver a reply to the instance it belongs to, returning the
    /// resulting [`LoopEvent`]s (an `Algorithm` event per probe event, plus
    /// a trailing `Terminated` if this reply ended the run).
    pub fn deliver_reply(&mut self, id: InstanceId, sequence: Sequence, reply: Reply) -> Vec<LoopEvent> {
        self.dispatch(id, |running| running.on_reply(sequence, reply))
    }

    pub fn deliver_timeout(&mut self, id: InstanceId, sequence: Sequence) -> Vec<LoopEvent> {
        self.dispatch(id, |running| running.on_timeout(sequence))
    }

    fn dispatch(&mut self, id: InstanceId, f: impl FnOnce(&mut Running) -> Vec<AlgorithmEvent>) -> Vec<LoopEvent> {
        let Some(instance) = self.instances.iter_mut().find(|i| i.id == id) else {
            return Vec::new();
        };
        let events = f(&mut instance.running);
        let mut out: Vec<LoopEvent> = events
            .into_iter()
            .map(|event| LoopEvent::Algorithm { instance: id, event })
            .collect();
        if instance.running.is_terminated() {
            if let Some(result) = instance.running.result() {
                out.push(LoopEvent::Terminated { instance: id, result });
            }
        }
        out
    }

    #[must_use]
    pub fn all_terminated(&self) -> bool {
        self.instances.iter().all(|i| i.stopped || i.running.is_terminated())
    }

    /// Stop and remove every instance in reverse insertion order, per the
    /// event loop's termination contract (§4.4).
    pub fn teardown_all(&mut self) {
        while let Some(instance) = self.instances.pop() {
            drop(instance);
        }
    }
}
