use flowmat_archive::{Direction, FlowId, Process, ProcessId};
use tracing::warn;

/// Dense index of a product flow, assigned in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PfIndex(pub usize);

/// Dense index of an emission (row of the exterior matrix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EmIndex(pub usize);

/// The process side of a product flow: either an archive process or a
/// transient market synthesized by the `mix` termination strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermRef {
    Archive(ProcessId),
    Virtual(usize),
}

/// Identity of a product flow.  The process part is `None` for boundary
/// flows whose named process carries no matching reference exchange.
pub type PfKey = (FlowId, Option<TermRef>);

/// A matched row-and-column of the interior matrix: a particular process
/// producing (or consuming) a particular reference flow.
#[derive(Debug, Clone)]
pub struct ProductFlow {
    index: PfIndex,
    flow: FlowId,
    term: TermRef,
    key: PfKey,
    inbound_ev: f64,
}

impl ProductFlow {
    /// Construction fails softly: a process without a reference exchange for
    /// `flow` yields a boundary product flow (null process-part in the key,
    /// unit inbound magnitude) rather than an error.
    pub fn new(index: PfIndex, flow: FlowId, term: TermRef, process: &Process) -> Self {
        let mut key = (flow, None);
        let mut inbound_ev = 1.0;
        match process.find_reference(flow) {
            None => {
                warn!(
                    process = %process.uuid,
                    flow = flow.0,
                    "no matching reference exchange; treating product flow as a cutoff boundary"
                );
            }
            Some(rx) => {
                key = (flow, Some(term));
                inbound_ev = match rx.value {
                    Some(v) => v,
                    None => {
                        warn!(
                            process = %process.uuid,
                            flow = flow.0,
                            "reference exchange has no value; using 1.0"
                        );
                        1.0
                    }
                };
                if rx.direction == Direction::Input {
                    inbound_ev = -inbound_ev;
                }
            }
        }
        Self {
            index,
            flow,
            term,
            key,
            inbound_ev,
        }
    }

    pub fn index(&self) -> PfIndex {
        self.index
    }

    pub fn flow(&self) -> FlowId {
        self.flow
    }

    pub fn term(&self) -> TermRef {
        self.term
    }

    pub fn key(&self) -> PfKey {
        self.key
    }

    /// Direction-adjusted magnitude of the reference exchange.  Every other
    /// exchange of the process is normalized by this value.
    pub fn inbound_ev(&self) -> f64 {
        self.inbound_ev
    }

    /// Fold a self-dependency into the reference magnitude: the process
    /// consumes `value` of its own reference flow per reference unit.
    pub fn absorb(&mut self, value: f64) {
        self.inbound_ev -= value;
    }
}

/// A (flow, direction) pair indexing a row of the exterior matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    pub index: EmIndex,
    pub flow: FlowId,
    pub direction: Direction,
}

impl Emission {
    pub fn key(&self) -> (FlowId, Direction) {
        (self.flow, self.direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_ev_defaults_and_negation() {
        let f = FlowId(0);
        let mut p = Process::new("p", "p");
        p.add_reference(f, Direction::Output, Some(2.0));
        let pf = ProductFlow::new(PfIndex(0), f, TermRef::Archive(ProcessId(0)), &p);
        assert_eq!(pf.inbound_ev(), 2.0);
        assert_eq!(pf.key(), (f, Some(TermRef::Archive(ProcessId(0)))));

        let mut p = Process::new("p2", "p2");
        p.add_reference(f, Direction::Input, Some(2.0));
        let pf = ProductFlow::new(PfIndex(1), f, TermRef::Archive(ProcessId(1)), &p);
        assert_eq!(pf.inbound_ev(), -2.0);

        let mut p = Process::new("p3", "p3");
        p.add_reference(f, Direction::Output, None);
        let pf = ProductFlow::new(PfIndex(2), f, TermRef::Archive(ProcessId(2)), &p);
        assert_eq!(pf.inbound_ev(), 1.0);
    }

    #[test]
    fn missing_reference_yields_boundary_key() {
        let f = FlowId(0);
        let p = Process::new("p", "no reference here");
        let pf = ProductFlow::new(PfIndex(0), f, TermRef::Archive(ProcessId(0)), &p);
        assert_eq!(pf.key(), (f, None));
        assert_eq!(pf.inbound_ev(), 1.0);
    }

    #[test]
    fn absorb_subtracts_from_inbound_ev() {
        let f = FlowId(0);
        let mut p = Process::new("p", "p");
        p.add_reference(f, Direction::Output, Some(1.0));
        let mut pf = ProductFlow::new(PfIndex(0), f, TermRef::Archive(ProcessId(0)), &p);
        pf.absorb(0.1);
        assert_eq!(pf.inbound_ev(), 0.9);
    }
}
