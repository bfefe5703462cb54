use std::collections::{HashMap, VecDeque};

use ndarray::Array1;
use regex::Regex;
use tracing::{info, warn};

use flowmat_archive::{Archive, Direction, FlowId, Process, ProcessId, QuantityId};

use crate::entry::{CutoffEntry, MatrixEntry};
use crate::error::BackgroundError;
use crate::product_flow::{EmIndex, Emission, PfIndex, PfKey, ProductFlow, TermRef};
use crate::resolver::{MultiTermStrategy, Resolution, TerminationIndex, resolve_termination};
use crate::solver::csc::{CscBuilder, CscMatrix};
use crate::solver::dense::foreground_x_tilde;
use crate::solver::lci::{DEFAULT_COUNT, DEFAULT_THRESHOLD, iterate_lci};
use crate::tarjan::TarjanStack;

/// Largest traversal depth considered safe by default.
pub const MAX_SAFE_RECURSION_LIMIT: usize = 18_000;

#[derive(Debug, Clone)]
pub struct TraversalOptions {
    pub multi_term: MultiTermStrategy,
    /// Quantity used to allocate multi-output processes encountered without
    /// allocation factors.  Without it such processes become dead-end cutoffs.
    pub default_allocation: Option<QuantityId>,
    /// Cap on live traversal frames.
    pub max_depth: usize,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            multi_term: MultiTermStrategy::default(),
            default_allocation: None,
            max_depth: MAX_SAFE_RECURSION_LIMIT,
        }
    }
}

/// One row of a computed inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryRow {
    pub term: TermRef,
    pub flow: FlowId,
    pub direction: Direction,
    pub value: f64,
}

/// The sub-matrices extracted for a foreground query: `flows` orders the
/// columns of all three matrices (and the rows of `af`).
#[derive(Debug)]
pub struct ForegroundMatrices {
    pub flows: Vec<PfIndex>,
    pub af: CscMatrix,
    pub ad: CscMatrix,
    pub bf: CscMatrix,
}

#[derive(Debug, Clone)]
struct ChildExchange {
    flow: FlowId,
    direction: Direction,
    value: f64,
    termination: Option<ProcessId>,
}

/// One suspended visit of the iterative Tarjan traversal.
struct Frame {
    pf: PfIndex,
    children: Vec<ChildExchange>,
    next: usize,
    /// Child frame pushed for this parent, with the direction-adjusted
    /// exchange value; consumed when the child's subtree completes.
    pending: Option<(PfIndex, f64)>,
}

enum Step {
    Child {
        parent: PfIndex,
        exchange: ChildExchange,
    },
    Done(PfIndex),
}

/// Manages a collection of linked processes as a coherent technology matrix:
/// drives the traversal, owns every product flow, emission and entry, and
/// materializes the frozen background matrices A* and B*.
#[derive(Debug)]
pub struct BackgroundManager {
    archive: Archive,
    options: TraversalOptions,

    tstack: TarjanStack,
    lowlinks: Vec<usize>,
    pf_keys: HashMap<PfKey, PfIndex>,
    pf_index: Vec<ProductFlow>,
    emission_keys: HashMap<(FlowId, Direction), EmIndex>,
    ef_index: Vec<Emission>,

    // pending entries, drained after each top-level traversal
    interior_incoming: VecDeque<MatrixEntry>,
    cutoff_incoming: VecDeque<CutoffEntry>,

    // drained entries, routed by background membership of the parent
    interior: Vec<MatrixEntry>,
    foreground: Vec<MatrixEntry>,
    bg_emission: Vec<CutoffEntry>,
    cutoff: Vec<CutoffEntry>,

    terminations: TerminationIndex,
    /// Transient market processes synthesized by the `mix` strategy.
    virtual_processes: Vec<Process>,

    a_matrix: Option<CscMatrix>,
    b_matrix: Option<CscMatrix>,
}

impl BackgroundManager {
    pub fn new(archive: Archive, options: TraversalOptions) -> Result<Self, BackgroundError> {
        let required = archive.process_count();
        if required > options.max_depth {
            return Err(BackgroundError::RecursionBudgetExceeded {
                required,
                limit: options.max_depth,
            });
        }
        let terminations = TerminationIndex::build(&archive);
        Ok(Self {
            archive,
            options,
            tstack: TarjanStack::new(),
            lowlinks: Vec::new(),
            pf_keys: HashMap::new(),
            pf_index: Vec::new(),
            emission_keys: HashMap::new(),
            ef_index: Vec::new(),
            interior_incoming: VecDeque::new(),
            cutoff_incoming: VecDeque::new(),
            interior: Vec::new(),
            foreground: Vec::new(),
            bg_emission: Vec::new(),
            cutoff: Vec::new(),
            terminations,
            virtual_processes: Vec::new(),
            a_matrix: None,
            b_matrix: None,
        })
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn tarjan(&self) -> &TarjanStack {
        &self.tstack
    }

    /// Frames needed to traverse the whole archive in the worst case.
    pub fn required_recursion_limit(&self) -> usize {
        self.archive.process_count()
    }

    pub fn ndim(&self) -> usize {
        self.tstack.ndim()
    }

    pub fn mdim(&self) -> usize {
        self.ef_index.len()
    }

    pub fn product_flow_count(&self) -> usize {
        self.pf_index.len()
    }

    pub fn product_flow(&self, pf: PfIndex) -> &ProductFlow {
        &self.pf_index[pf.0]
    }

    pub fn emissions(&self) -> &[Emission] {
        &self.ef_index
    }

    /// The process behind a term reference, archive or virtual.
    pub fn process(&self, term: TermRef) -> &Process {
        match term {
            TermRef::Archive(pid) => self.archive.process(pid),
            TermRef::Virtual(i) => &self.virtual_processes[i],
        }
    }

    /// Display label, "process == flow".
    pub fn label(&self, pf: PfIndex) -> String {
        let pf = &self.pf_index[pf.0];
        format!(
            "{} == {}",
            self.process(pf.term()).name,
            self.archive.flow(pf.flow()).name
        )
    }

    /// The product flow for a (reference flow, archive process) pair.
    pub fn find_product_flow(&self, flow: FlowId, process: ProcessId) -> Option<PfIndex> {
        self.check_product_flow(flow, TermRef::Archive(process))
    }

    pub fn is_background(&self, pf: PfIndex) -> bool {
        self.tstack.is_background(pf)
    }

    /// Foreground product flows downstream of `pf` (inclusive); empty when
    /// `pf` is background.
    pub fn foreground(&self, pf: PfIndex) -> Vec<PfIndex> {
        self.tstack.foreground(pf)
    }

    pub fn a_matrix(&self) -> Option<&CscMatrix> {
        self.a_matrix.as_ref()
    }

    pub fn b_matrix(&self) -> Option<&CscMatrix> {
        self.b_matrix.as_ref()
    }

    /// Foreground product flows, optionally filtered by a label search.
    pub fn product_flows<'a>(
        &'a self,
        search: Option<&'a Regex>,
        outputs: bool,
    ) -> impl Iterator<Item = PfIndex> + 'a {
        self.tstack
            .foreground_flows(outputs)
            .filter(move |&pf| search.is_none_or(|re| re.is_match(&self.label(pf))))
    }

    /// Background product flows in column order, optionally filtered.
    pub fn background_flows<'a>(
        &'a self,
        search: Option<&'a Regex>,
    ) -> impl Iterator<Item = PfIndex> + 'a {
        self.tstack
            .background_flows()
            .filter(move |&pf| search.is_none_or(|re| re.is_match(&self.label(pf))))
    }

    /// Seed a traversal from every reference exchange of every process, then
    /// integrate the discovered entries.
    pub fn add_all_ref_products(&mut self) -> Result<(), BackgroundError> {
        let seeds: Vec<(ProcessId, Vec<FlowId>)> = self
            .archive
            .processes()
            .map(|(pid, p)| (pid, p.reference_exchanges().map(|x| x.flow).collect()))
            .collect();
        for (pid, flows) in seeds {
            for flow in flows {
                if self.check_product_flow(flow, TermRef::Archive(pid)).is_none() {
                    self.add_ref_product_inner(flow, pid)?;
                }
            }
        }
        self.update_component_graph()
    }

    /// Add a single reference product (one column of A + B), traversing its
    /// dependencies.  Idempotent for known (flow, process) pairs.
    pub fn add_ref_product(
        &mut self,
        flow: FlowId,
        termination: ProcessId,
    ) -> Result<PfIndex, BackgroundError> {
        if let Some(existing) = self.check_product_flow(flow, TermRef::Archive(termination)) {
            return Ok(existing);
        }
        let pf = self.add_ref_product_inner(flow, termination)?;
        self.update_component_graph()?;
        Ok(pf)
    }

    fn add_ref_product_inner(
        &mut self,
        flow: FlowId,
        termination: ProcessId,
    ) -> Result<PfIndex, BackgroundError> {
        let root = self.create_product_flow(flow, TermRef::Archive(termination));
        self.traverse(root)?;
        Ok(root)
    }

    fn check_product_flow(&self, flow: FlowId, term: TermRef) -> Option<PfIndex> {
        self.pf_keys.get(&(flow, Some(term))).copied()
    }

    /// Create a product flow, register it under its lookup key, and push it
    /// onto the Tarjan stack with lowlink = index.
    fn create_product_flow(&mut self, flow: FlowId, term: TermRef) -> PfIndex {
        let index = PfIndex(self.pf_index.len());
        let pf = ProductFlow::new(index, flow, term, self.process(term));
        self.pf_keys.insert((flow, Some(term)), index);
        self.lowlinks.push(index.0);
        self.pf_index.push(pf);
        self.tstack.add_to_stack(index);
        index
    }

    fn add_emission(&mut self, flow: FlowId, direction: Direction) -> EmIndex {
        if let Some(&index) = self.emission_keys.get(&(flow, direction)) {
            return index;
        }
        let index = EmIndex(self.ef_index.len());
        self.emission_keys.insert((flow, direction), index);
        self.ef_index.push(Emission {
            index,
            flow,
            direction,
        });
        index
    }

    fn lowlink(&self, pf: PfIndex) -> usize {
        self.lowlinks[pf.0]
    }

    fn set_lowlink(&mut self, pf: PfIndex, lowlink: usize) {
        let slot = &mut self.lowlinks[pf.0];
        *slot = (*slot).min(lowlink);
    }

    /// Find the termination for an exchange: explicit link, sole candidate,
    /// or the configured multi-termination policy.
    fn terminate(
        &mut self,
        flow: FlowId,
        direction: Direction,
        termination: Option<ProcessId>,
    ) -> Option<TermRef> {
        if let Some(pid) = termination {
            return Some(TermRef::Archive(pid));
        }
        let candidates = self.terminations.candidates(flow, direction).to_vec();
        if candidates.len() == 1 {
            return Some(TermRef::Archive(candidates[0]));
        }
        match resolve_termination(
            &self.archive,
            flow,
            direction,
            &candidates,
            self.options.multi_term,
        ) {
            Resolution::Cutoff => None,
            Resolution::Process(pid) => Some(TermRef::Archive(pid)),
            Resolution::Market(market) => {
                let index = self.virtual_processes.len();
                self.virtual_processes.push(market);
                Some(TermRef::Virtual(index))
            }
        }
    }

    /// Materialize the child exchanges of a product flow: every non-reference
    /// exchange with a usable (allocated, non-null, non-zero) value.
    fn build_children(&mut self, pf: PfIndex) -> Vec<ChildExchange> {
        let flow = self.pf_index[pf.0].flow();
        let term = self.pf_index[pf.0].term();

        if let TermRef::Archive(pid) = term {
            let needs_allocation = {
                let p = self.archive.process(pid);
                p.find_reference(flow).is_some() && !p.is_allocated()
            };
            if needs_allocation {
                match self.options.default_allocation {
                    Some(quantity) => {
                        if let Err(e) = self.archive.allocate_by_quantity(pid, quantity) {
                            warn!(
                                process = %self.archive.process(pid).uuid,
                                error = %e,
                                "cutting off at un-allocated multi-output process"
                            );
                            return Vec::new();
                        }
                    }
                    None => {
                        warn!(
                            process = %self.archive.process(pid).uuid,
                            "cutting off at un-allocated multi-output process"
                        );
                        return Vec::new();
                    }
                }
            }
        }

        let process = self.process(term);
        // Boundary product flows (no matching reference) have no children.
        let Some(rx) = process.find_reference(flow) else {
            return Vec::new();
        };
        let rx_flow = rx.flow;
        let mut children = Vec::new();
        for x in process.exchanges() {
            if x.reference {
                continue;
            }
            let Some(value) = process.exchange_value(x, rx_flow) else {
                continue;
            };
            if value == 0.0 {
                // zero entries (and their descendants) stay out of the matrix
                continue;
            }
            children.push(ChildExchange {
                flow: x.flow,
                direction: x.direction,
                value,
                termination: x.termination,
            });
        }
        children
    }

    /// Iterative Tarjan visit rooted at `root` (already on the stack).
    fn traverse(&mut self, root: PfIndex) -> Result<(), BackgroundError> {
        let children = self.build_children(root);
        let mut frames = vec![Frame {
            pf: root,
            children,
            next: 0,
            pending: None,
        }];

        loop {
            let step = {
                let Some(top) = frames.last_mut() else { break };
                if let Some((child, value)) = top.pending.take() {
                    // child subtree completed: carry back its lowlink, then
                    // record the interior entry in discovery order
                    let parent = top.pf;
                    let child_lowlink = self.lowlink(child);
                    self.set_lowlink(parent, child_lowlink);
                    self.add_interior(parent, child, value);
                }
                if top.next < top.children.len() {
                    top.next += 1;
                    Step::Child {
                        parent: top.pf,
                        exchange: top.children[top.next - 1].clone(),
                    }
                } else {
                    Step::Done(top.pf)
                }
            };

            match step {
                Step::Child { parent, exchange } => {
                    let Some(term) =
                        self.terminate(exchange.flow, exchange.direction, exchange.termination)
                    else {
                        // cutoff: raw value, exchange's own sign
                        let emission = self.add_emission(exchange.flow, exchange.direction);
                        self.cutoff_incoming.push_back(CutoffEntry::new(
                            parent,
                            emission,
                            exchange.value,
                        ));
                        continue;
                    };

                    // interior flow: enforce the normative direction
                    let value = if exchange.direction == Direction::Output {
                        -exchange.value
                    } else {
                        exchange.value
                    };

                    match self.check_product_flow(exchange.flow, term) {
                        Some(child) => {
                            if self.tstack.check_stack(child) {
                                // on stack: carry back the child's index
                                self.set_lowlink(parent, child.0);
                            }
                            self.add_interior(parent, child, value);
                        }
                        None => {
                            if frames.len() >= self.options.max_depth {
                                return Err(BackgroundError::RecursionBudgetExceeded {
                                    required: frames.len() + 1,
                                    limit: self.options.max_depth,
                                });
                            }
                            let child = self.create_product_flow(exchange.flow, term);
                            let grandchildren = self.build_children(child);
                            frames
                                .last_mut()
                                .expect("parent frame is live")
                                .pending = Some((child, value));
                            frames.push(Frame {
                                pf: child,
                                children: grandchildren,
                                next: 0,
                                pending: None,
                            });
                        }
                    }
                }
                Step::Done(pf) => {
                    if self.lowlink(pf) == pf.0 {
                        self.tstack.label_scc(pf.0, pf);
                    }
                    frames.pop();
                }
            }
        }
        Ok(())
    }

    fn add_interior(&mut self, parent: PfIndex, term: PfIndex, value: f64) {
        if parent == term {
            info!(
                product_flow = %self.label(parent),
                value,
                "self-dependency absorbed into inbound reference magnitude"
            );
            self.pf_index[parent.0].absorb(value);
        } else {
            self.interior_incoming
                .push_back(MatrixEntry::new(parent, term, value));
        }
    }

    /// Integrate pending entries: update the component graph, normalize each
    /// entry exactly once, route by background membership of the parent, and
    /// assemble A*/B* the first time a background exists.
    fn update_component_graph(&mut self) -> Result<(), BackgroundError> {
        self.tstack
            .add_to_graph(self.interior_incoming.iter().map(|e| (e.parent(), e.term())));

        while let Some(mut entry) = self.interior_incoming.pop_front() {
            let inbound_ev = self.pf_index[entry.parent().0].inbound_ev();
            entry.adjust_val(inbound_ev)?;
            if self.tstack.is_background(entry.parent()) {
                self.interior.push(entry);
            } else {
                self.foreground.push(entry);
            }
        }
        while let Some(mut entry) = self.cutoff_incoming.pop_front() {
            let inbound_ev = self.pf_index[entry.parent().0].inbound_ev();
            entry.adjust_val(inbound_ev)?;
            if self.tstack.is_background(entry.parent()) {
                self.bg_emission.push(entry);
            } else {
                self.cutoff.push(entry);
            }
        }

        match &self.a_matrix {
            None => {
                if self.tstack.background().is_some() {
                    self.construct_a_matrix()?;
                    self.construct_b_matrix()?;
                }
            }
            Some(a) => {
                if a.dim.ncols != self.tstack.ndim() {
                    // a traversal after freezing grew the background
                    return Err(BackgroundError::DoubleAssembly { matrix: "A*" });
                }
            }
        }
        Ok(())
    }

    fn construct_a_matrix(&mut self) -> Result<(), BackgroundError> {
        if self.a_matrix.is_some() {
            return Err(BackgroundError::DoubleAssembly { matrix: "A*" });
        }
        let ndim = self.tstack.ndim();
        let mut builder = CscBuilder::new(ndim, ndim);
        for entry in &self.interior {
            let row = self
                .tstack
                .bg_dict(entry.term())
                .expect("term of a background parent is background");
            let col = self
                .tstack
                .bg_dict(entry.parent())
                .expect("interior parents are background");
            builder.push(row, col, entry.value())?;
        }
        self.a_matrix = Some(builder.build());
        Ok(())
    }

    fn construct_b_matrix(&mut self) -> Result<(), BackgroundError> {
        if self.b_matrix.is_some() {
            return Err(BackgroundError::DoubleAssembly { matrix: "B*" });
        }
        let ndim = self.tstack.ndim();
        let mut builder = CscBuilder::new(self.mdim(), ndim);
        for entry in &self.bg_emission {
            let col = self
                .tstack
                .bg_dict(entry.parent())
                .expect("background emission parents are background");
            builder.push(entry.emission().0, col, entry.value())?;
        }
        self.b_matrix = Some(builder.build());
        Ok(())
    }

    /// Unit activity vector for a background product flow: `ad` with a single
    /// 1.0 at its column, and an all-zero `bf`.
    pub fn make_background(
        &self,
        pf: PfIndex,
    ) -> Result<(CscMatrix, CscMatrix), BackgroundError> {
        let col = self
            .tstack
            .bg_dict(pf)
            .ok_or(BackgroundError::UnknownProductFlow(pf.0))?;
        let mut ad = CscBuilder::new(self.ndim(), 1);
        ad.push(col, 0, 1.0)?;
        Ok((ad.build(), CscMatrix::zeros(self.mdim(), 1)))
    }

    /// Af/Ad/Bf for the foreground reachable from `pf`.  For a background
    /// `pf` this degenerates to column extraction: Af is 1x1 zero, Ad and Bf
    /// are the product flow's columns of A* and B*.
    pub fn make_foreground(&self, pf: PfIndex) -> Result<ForegroundMatrices, BackgroundError> {
        if pf.0 >= self.pf_index.len() {
            return Err(BackgroundError::UnknownProductFlow(pf.0));
        }
        if let Some(col) = self.tstack.bg_dict(pf) {
            let a = self
                .a_matrix
                .as_ref()
                .expect("a background column implies assembled matrices");
            let b = self
                .b_matrix
                .as_ref()
                .expect("a background column implies assembled matrices");
            let mut bf = b.extract_col(col);
            // emissions discovered after freezing pad B*'s rows
            bf.dim.nrows = self.mdim();
            return Ok(ForegroundMatrices {
                flows: Vec::new(),
                af: CscMatrix::zeros(1, 1),
                ad: a.extract_col(col),
                bf,
            });
        }
        let flows = self.tstack.foreground(pf);
        self.assemble_foreground(flows)
    }

    /// Af/Ad/Bf over the entire foreground in topological (outputs-first)
    /// order, or `None` when the database has no foreground.
    pub fn make_foreground_all(&self) -> Result<Option<ForegroundMatrices>, BackgroundError> {
        let flows = self.tstack.foreground_ordering();
        if flows.is_empty() {
            return Ok(None);
        }
        self.assemble_foreground(flows).map(Some)
    }

    fn assemble_foreground(
        &self,
        flows: Vec<PfIndex>,
    ) -> Result<ForegroundMatrices, BackgroundError> {
        let pdim = flows.len();
        let fg_dict: HashMap<usize, usize> =
            flows.iter().enumerate().map(|(n, pf)| (pf.0, n)).collect();

        let mut af = CscBuilder::new(pdim, pdim);
        let mut ad = CscBuilder::new(self.ndim(), pdim);
        let mut bf = CscBuilder::new(self.mdim(), pdim);

        for entry in &self.foreground {
            let Some(&col) = fg_dict.get(&entry.parent().0) else {
                continue;
            };
            if let Some(row) = self.tstack.bg_dict(entry.term()) {
                ad.push(row, col, entry.value())?;
            } else if let Some(&row) = fg_dict.get(&entry.term().0) {
                af.push(row, col, entry.value())?;
            } else {
                warn!(
                    parent = %self.label(entry.parent()),
                    term = %self.label(entry.term()),
                    "losing foreground cutoff outside the requested fragment"
                );
            }
        }
        for entry in &self.cutoff {
            if let Some(&col) = fg_dict.get(&entry.parent().0) {
                bf.push(entry.emission().0, col, entry.value())?;
            }
        }

        Ok(ForegroundMatrices {
            flows,
            af: af.build(),
            ad: ad.build(),
            bf: bf.build(),
        })
    }

    /// Background LCI with default convergence parameters.
    pub fn compute_bg_lci(&self, ad: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        self.compute_bg_lci_with(ad, DEFAULT_THRESHOLD, DEFAULT_COUNT)
    }

    /// Background LCI via iterative multiplication: `(total, B* total)`, with
    /// the emission vector padded to the current emission count.  An empty
    /// background yields zeros.
    pub fn compute_bg_lci_with(
        &self,
        ad: &Array1<f64>,
        threshold: f64,
        count: usize,
    ) -> (Array1<f64>, Array1<f64>) {
        match (&self.a_matrix, &self.b_matrix) {
            (Some(a), Some(b)) => {
                let (total, bx) = iterate_lci(a, b, ad.view(), threshold, count);
                let mut padded = Array1::zeros(self.mdim());
                for (i, v) in bx.iter().enumerate() {
                    padded[i] = *v;
                }
                (total, padded)
            }
            _ => (Array1::zeros(self.ndim()), Array1::zeros(self.mdim())),
        }
    }

    /// Full LCI for a product flow: `(total, bx, bf_tilde)` where `bx` is the
    /// background emission vector and `bf_tilde` the direct foreground one.
    pub fn compute_lci(
        &self,
        pf: PfIndex,
    ) -> Result<(Array1<f64>, Array1<f64>, Array1<f64>), BackgroundError> {
        if self.is_background(pf) {
            let (ad, _bf) = self.make_background(pf)?;
            let ad = ad.matvec(Array1::ones(1).view());
            let (total, bx) = self.compute_bg_lci(&ad);
            Ok((total, bx, Array1::zeros(self.mdim())))
        } else {
            let fg = self.make_foreground(pf)?;
            let x_tilde = foreground_x_tilde(&fg.af, 0)?;
            let ad_tilde = fg.ad.matvec(x_tilde.view());
            let (total, bx) = self.compute_bg_lci(&ad_tilde);
            let bf_tilde = fg.bf.matvec(x_tilde.view());
            Ok((total, bx, bf_tilde))
        }
    }

    /// Inventory rows for a product flow: every emission whose cumulative
    /// value is non-zero.
    pub fn lci(&self, pf: PfIndex) -> Result<Vec<InventoryRow>, BackgroundError> {
        let (_total, bx, bf_tilde) = self.compute_lci(pf)?;
        let term = self.pf_index[pf.0].term();
        let mut rows = Vec::new();
        for (i, em) in self.ef_index.iter().enumerate() {
            let value = bx[i] + bf_tilde[i];
            if value != 0.0 {
                rows.push(InventoryRow {
                    term,
                    flow: em.flow,
                    direction: em.direction,
                    value,
                });
            }
        }
        Ok(rows)
    }
}
