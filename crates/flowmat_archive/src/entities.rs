use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Dense index of a quantity within its archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuantityId(pub usize);

/// Dense index of a flow within its archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowId(pub usize);

/// Dense index of a process within its archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub usize);

/// Exchange direction relative to the owning process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    /// The direction that terminates this one: a process consuming a flow is
    /// terminated by a process producing it, and vice versa.
    pub fn complement(self) -> Direction {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// A measurable property (mass, energy, an LCIA indicator...).
#[derive(Debug, Clone, Serialize)]
pub struct Quantity {
    pub uuid: String,
    pub name: String,
    pub unit: Option<String>,
}

/// A commodity or environmental flow.
#[derive(Debug, Clone, Serialize)]
pub struct Flow {
    pub uuid: String,
    pub name: String,
    /// Compartment path, most general segment first (e.g. ["air", "urban"]).
    pub compartment: Vec<String>,
    /// Characterization factors local to the flow, keyed by quantity.
    pub characterizations: HashMap<QuantityId, f64>,
}

impl Flow {
    pub fn cf(&self, quantity: QuantityId) -> Option<f64> {
        self.characterizations.get(&quantity).copied()
    }

    /// Most general compartment segment, if any.
    pub fn root_compartment(&self) -> Option<&str> {
        self.compartment.first().map(|s| s.as_str())
    }
}

/// A quantified flow crossing a process boundary.
///
/// `value` is optional: source databases routinely carry unvalued exchanges,
/// and the traversal treats a missing or zero value as "do not descend".
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub flow: FlowId,
    pub direction: Direction,
    pub value: Option<f64>,
    /// Explicit terminating process, when the database links the exchange.
    pub termination: Option<ProcessId>,
    pub reference: bool,
}

/// A unit process: an ordered list of exchanges, one or more of which are
/// reference exchanges (the products the process exists to supply).
#[derive(Debug, Clone, Serialize)]
pub struct Process {
    pub uuid: String,
    pub name: String,
    exchanges: Vec<Exchange>,
    /// Positions of reference exchanges within `exchanges`, in declaration order.
    references: Vec<usize>,
    /// Allocation factors per reference flow, once allocated.
    allocation: Option<HashMap<FlowId, f64>>,
}

impl Process {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            exchanges: Vec::new(),
            references: Vec::new(),
            allocation: None,
        }
    }

    pub fn add_exchange(
        &mut self,
        flow: FlowId,
        direction: Direction,
        value: Option<f64>,
        termination: Option<ProcessId>,
    ) {
        self.exchanges.push(Exchange {
            flow,
            direction,
            value,
            termination,
            reference: false,
        });
    }

    /// Append a reference exchange.
    pub fn add_reference(&mut self, flow: FlowId, direction: Direction, value: Option<f64>) {
        self.references.push(self.exchanges.len());
        self.exchanges.push(Exchange {
            flow,
            direction,
            value,
            termination: None,
            reference: true,
        });
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn reference_exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.references.iter().map(|&i| &self.exchanges[i])
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// The reference exchange carrying the given flow, if any.
    pub fn find_reference(&self, flow: FlowId) -> Option<&Exchange> {
        self.reference_exchanges().find(|x| x.flow == flow)
    }

    /// Single-reference processes are vacuously allocated; multi-reference
    /// processes are allocated once factors have been assigned.
    pub fn is_allocated(&self) -> bool {
        self.references.len() <= 1 || self.allocation.is_some()
    }

    pub fn allocation_factor(&self, reference_flow: FlowId) -> Option<f64> {
        self.allocation.as_ref()?.get(&reference_flow).copied()
    }

    pub(crate) fn set_allocation(&mut self, factors: HashMap<FlowId, f64>) {
        self.allocation = Some(factors);
    }

    /// Magnitude of `exchange` with respect to the reference carrying
    /// `reference_flow`: the raw value for single-reference processes, the
    /// allocated share otherwise. `None` when the exchange is unvalued or the
    /// process has not been allocated for that reference.
    pub fn exchange_value(&self, exchange: &Exchange, reference_flow: FlowId) -> Option<f64> {
        let value = exchange.value?;
        if self.references.len() <= 1 {
            return Some(value);
        }
        let factor = self.allocation_factor(reference_flow)?;
        Some(value * factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_complement_round_trips() {
        assert_eq!(Direction::Input.complement(), Direction::Output);
        assert_eq!(Direction::Output.complement(), Direction::Input);
        assert_eq!(Direction::Input.complement().complement(), Direction::Input);
    }

    #[test]
    fn single_reference_process_is_vacuously_allocated() {
        let mut p = Process::new("p", "widget maker");
        p.add_reference(FlowId(0), Direction::Output, Some(1.0));
        p.add_exchange(FlowId(1), Direction::Input, Some(2.0), None);
        assert!(p.is_allocated());

        let x = &p.exchanges()[1];
        assert_eq!(p.exchange_value(x, FlowId(0)), Some(2.0));
    }

    #[test]
    fn multi_reference_process_needs_factors() {
        let mut p = Process::new("p", "co-producer");
        p.add_reference(FlowId(0), Direction::Output, Some(1.0));
        p.add_reference(FlowId(1), Direction::Output, Some(1.0));
        p.add_exchange(FlowId(2), Direction::Input, Some(10.0), None);
        assert!(!p.is_allocated());

        let x = p.exchanges()[2].clone();
        assert_eq!(p.exchange_value(&x, FlowId(0)), None);

        p.set_allocation([(FlowId(0), 0.25), (FlowId(1), 0.75)].into());
        assert!(p.is_allocated());
        assert_eq!(p.exchange_value(&x, FlowId(0)), Some(2.5));
        assert_eq!(p.exchange_value(&x, FlowId(1)), Some(7.5));
    }
}
