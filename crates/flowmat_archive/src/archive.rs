use std::collections::HashMap;

use tracing::warn;

use crate::entities::{Flow, FlowId, Process, ProcessId, Quantity, QuantityId};
use crate::error::ArchiveError;

/// An interning store of quantities, flows and processes.
///
/// Entities are held in load order; the dense ids handed out here are the
/// determinism anchor for everything downstream (product-flow indices, SCC
/// ids, matrix column ordering all derive from archive enumeration order).
#[derive(Debug, Default)]
pub struct Archive {
    pub title: String,
    quantities: Vec<Quantity>,
    flows: Vec<Flow>,
    processes: Vec<Process>,
    quantity_ids: HashMap<String, QuantityId>,
    flow_ids: HashMap<String, FlowId>,
    process_ids: HashMap<String, ProcessId>,
}

impl Archive {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn add_quantity(&mut self, quantity: Quantity) -> Result<QuantityId, ArchiveError> {
        if self.quantity_ids.contains_key(&quantity.uuid) {
            return Err(ArchiveError::DuplicateUuid {
                kind: "quantity",
                uuid: quantity.uuid,
            });
        }
        let id = QuantityId(self.quantities.len());
        self.quantity_ids.insert(quantity.uuid.clone(), id);
        self.quantities.push(quantity);
        Ok(id)
    }

    pub fn add_flow(&mut self, flow: Flow) -> Result<FlowId, ArchiveError> {
        if self.flow_ids.contains_key(&flow.uuid) {
            return Err(ArchiveError::DuplicateUuid {
                kind: "flow",
                uuid: flow.uuid,
            });
        }
        let id = FlowId(self.flows.len());
        self.flow_ids.insert(flow.uuid.clone(), id);
        self.flows.push(flow);
        Ok(id)
    }

    pub fn add_process(&mut self, process: Process) -> Result<ProcessId, ArchiveError> {
        if self.process_ids.contains_key(&process.uuid) {
            return Err(ArchiveError::DuplicateUuid {
                kind: "process",
                uuid: process.uuid,
            });
        }
        let id = ProcessId(self.processes.len());
        self.process_ids.insert(process.uuid.clone(), id);
        self.processes.push(process);
        Ok(id)
    }

    pub fn quantity(&self, id: QuantityId) -> &Quantity {
        &self.quantities[id.0]
    }

    pub fn flow(&self, id: FlowId) -> &Flow {
        &self.flows[id.0]
    }

    pub fn process(&self, id: ProcessId) -> &Process {
        &self.processes[id.0]
    }

    pub fn quantity_by_uuid(&self, uuid: &str) -> Option<QuantityId> {
        self.quantity_ids.get(uuid).copied()
    }

    pub fn flow_by_uuid(&self, uuid: &str) -> Option<FlowId> {
        self.flow_ids.get(uuid).copied()
    }

    pub fn process_by_uuid(&self, uuid: &str) -> Option<ProcessId> {
        self.process_ids.get(uuid).copied()
    }

    pub fn processes(&self) -> impl Iterator<Item = (ProcessId, &Process)> {
        self.processes.iter().enumerate().map(|(i, p)| (ProcessId(i), p))
    }

    pub fn flows(&self) -> impl Iterator<Item = (FlowId, &Flow)> {
        self.flows.iter().enumerate().map(|(i, f)| (FlowId(i), f))
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub(crate) fn replace_process(&mut self, id: ProcessId, process: Process) {
        debug_assert_eq!(self.processes[id.0].uuid, process.uuid);
        self.processes[id.0] = process;
    }

    /// Add a characterization factor to a flow after loading.
    pub fn characterize_flow(&mut self, flow: FlowId, quantity: QuantityId, value: f64) {
        self.flows[flow.0].characterizations.insert(quantity, value);
    }

    /// Assign allocation factors to a multi-reference process, proportional to
    /// `reference value x cf(quantity)` over its reference set.  Reference
    /// flows not characterized with respect to the quantity receive zero
    /// allocation.
    pub fn allocate_by_quantity(
        &mut self,
        process: ProcessId,
        quantity: QuantityId,
    ) -> Result<(), ArchiveError> {
        let mut shares: HashMap<FlowId, f64> = HashMap::new();
        let mut total = 0.0;
        for rx in self.processes[process.0].reference_exchanges() {
            let magnitude = rx.value.unwrap_or(1.0).abs();
            let cf = self.flows[rx.flow.0].cf(quantity).unwrap_or(0.0);
            let share = magnitude * cf;
            total += share;
            shares.insert(rx.flow, share);
        }
        if total == 0.0 {
            return Err(ArchiveError::EmptyAllocation {
                process: self.processes[process.0].uuid.clone(),
                quantity: self.quantities[quantity.0].uuid.clone(),
            });
        }
        for share in shares.values_mut() {
            *share /= total;
        }
        if shares.values().any(|&s| s == 0.0) {
            warn!(
                process = %self.processes[process.0].name,
                "allocation left at least one reference flow with zero share"
            );
        }
        self.processes[process.0].set_allocation(shares);
        Ok(())
    }
}
