use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::warn;

use crate::product_flow::PfIndex;

/// The active Tarjan stack plus the record of named SCCs and the component
/// graph derived from interior entries.
///
/// An SCC is identified by the index of its anchor (lowest) product flow.
/// Once entries are integrated, the index answers background membership,
/// dense background column assignment and foreground enumeration.
#[derive(Debug, Default)]
pub struct TarjanStack {
    stack: Vec<PfIndex>,
    stack_hash: HashSet<PfIndex>,

    /// SCC id -> members in pop order.
    sccs: BTreeMap<usize, Vec<PfIndex>>,
    scc_of: HashMap<PfIndex, usize>,

    /// Component graph, set-valued but insertion-ordered for determinism.
    /// An edge col -> row means the SCC `row` is a dependency of `col`.
    rows_by_col: HashMap<usize, Vec<usize>>,
    cols_by_row: HashMap<usize, Vec<usize>>,
    edges: HashSet<(usize, usize)>,

    background: Option<usize>,
    /// SCCs reachable from the background, excluding it, in DFS preorder.
    downstream: Vec<usize>,
    downstream_set: HashSet<usize>,

    /// ProductFlow index -> A*/B* column.
    bg_index: HashMap<usize, usize>,
    /// A*/B* column -> ProductFlow.
    bg_order: Vec<PfIndex>,
}

impl TarjanStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_stack(&self, pf: PfIndex) -> bool {
        self.stack_hash.contains(&pf)
    }

    pub fn add_to_stack(&mut self, pf: PfIndex) {
        debug_assert!(!self.check_stack(pf), "product flow already on stack");
        self.stack.push(pf);
        self.stack_hash.insert(pf);
    }

    /// Pop the stack into a new SCC identified by `lowlink`, stopping at (and
    /// including) the anchor product flow.
    pub fn label_scc(&mut self, lowlink: usize, anchor: PfIndex) {
        let members = self.sccs.entry(lowlink).or_default();
        loop {
            let node = self.stack.pop().expect("anchor is on the stack");
            self.stack_hash.remove(&node);
            members.push(node);
            self.scc_of.insert(node, lowlink);
            if node == anchor {
                break;
            }
        }
    }

    pub fn scc_id(&self, pf: PfIndex) -> usize {
        self.scc_of[&pf]
    }

    pub fn scc(&self, id: usize) -> &[PfIndex] {
        self.sccs.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn scc_count(&self) -> usize {
        self.sccs.len()
    }

    /// Record the SCC-level edges of a batch of interior (parent, term)
    /// pairs, then bring the background partition up to date.
    pub fn add_to_graph(&mut self, entries: impl Iterator<Item = (PfIndex, PfIndex)>) {
        for (parent, term) in entries {
            let col = self.scc_of[&parent];
            let row = self.scc_of[&term];
            if self.edges.insert((col, row)) {
                self.rows_by_col.entry(col).or_default().push(row);
                self.cols_by_row.entry(row).or_default().push(col);
            }
        }
        self.set_background();
    }

    /// Elect the largest SCC (strictly larger than 1; lowest id wins ties) and
    /// derive the downstream closure and dense background columns.
    fn set_background(&mut self) {
        let mut max_len = 0;
        let mut candidate = None;
        for (&id, members) in &self.sccs {
            if members.len() > max_len {
                max_len = members.len();
                candidate = Some(id);
            }
        }
        if max_len > 1 {
            self.background = candidate;
            self.set_downstream();
            self.generate_bg_index();
        }
    }

    /// Depth-first preorder over `rows_by_col` from the background, skipping
    /// self-edges.  Explicit frame stack: downstream chains can be long.
    fn set_downstream(&mut self) {
        self.downstream.clear();
        self.downstream_set.clear();
        let Some(background) = self.background else {
            return;
        };

        let mut frames: Vec<(usize, usize)> = vec![(background, 0)];
        while let Some(frame) = frames.last_mut() {
            let (node, next) = *frame;
            let deps = self.rows_by_col.get(&node).map(Vec::as_slice).unwrap_or(&[]);
            if next < deps.len() {
                frame.1 += 1;
                let dep = deps[next];
                if dep != node && self.downstream_set.insert(dep) {
                    self.downstream.push(dep);
                    frames.push((dep, 0));
                }
            } else {
                frames.pop();
            }
        }
    }

    fn generate_bg_index(&mut self) {
        self.bg_index.clear();
        self.bg_order.clear();
        let Some(background) = self.background else {
            return;
        };
        let scc_members: Vec<PfIndex> = self.scc(background).to_vec();
        for pf in scc_members {
            self.bg_order.push(pf);
        }
        for &scc in &self.downstream {
            self.bg_order
                .extend(self.sccs.get(&scc).map(Vec::as_slice).unwrap_or(&[]));
        }
        for (n, pf) in self.bg_order.iter().enumerate() {
            self.bg_index.insert(pf.0, n);
        }
    }

    pub fn background(&self) -> Option<usize> {
        self.background
    }

    /// Dimension of A* (and column count of B*).
    pub fn ndim(&self) -> usize {
        self.bg_index.len()
    }

    pub fn is_background(&self, pf: PfIndex) -> bool {
        self.bg_index.contains_key(&pf.0)
    }

    /// A*/B* column for a product flow, if it is background.
    pub fn bg_dict(&self, pf: PfIndex) -> Option<usize> {
        self.bg_index.get(&pf.0).copied()
    }

    /// Background product flows in column order: the background SCC's members
    /// first, then each downstream SCC's members.
    pub fn background_flows(&self) -> impl Iterator<Item = PfIndex> + '_ {
        self.bg_order.iter().copied()
    }

    /// Foreground product flows downstream of `start` (inclusive), in BFS
    /// enqueue order over the component graph, background SCCs skipped.
    /// Empty when `start` is itself background.
    pub fn foreground(&self, start: PfIndex) -> Vec<PfIndex> {
        if self.is_background(start) {
            return Vec::new();
        }
        let mut queue = VecDeque::from([self.scc_id(start)]);
        let mut seen = HashSet::new();
        let mut flows = Vec::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for &dep in self
                .rows_by_col
                .get(&current)
                .map(Vec::as_slice)
                .unwrap_or(&[])
            {
                if !self.bg_contains_scc(dep) {
                    queue.push_back(dep);
                }
            }
            flows.extend(self.scc(current));
        }
        flows
    }

    fn bg_contains_scc(&self, scc: usize) -> bool {
        self.background == Some(scc) || self.downstream_set.contains(&scc)
    }

    /// Foreground product flows across the whole database.  With `outputs`,
    /// only strict outputs (SCCs no other SCC depends on).
    pub fn foreground_flows(&self, outputs: bool) -> impl Iterator<Item = PfIndex> + '_ {
        self.sccs
            .iter()
            .filter(move |&(&id, _)| {
                if self.bg_contains_scc(id) {
                    return false;
                }
                !outputs
                    || self
                        .cols_by_row
                        .get(&id)
                        .map(Vec::as_slice)
                        .unwrap_or(&[])
                        .is_empty()
            })
            .flat_map(|(_, members)| members.iter().copied())
    }

    /// Topological ordering of the whole foreground (outputs first), the
    /// column ordering for whole-foreground Af/Ad/Bf assembly.
    pub fn foreground_ordering(&self) -> Vec<PfIndex> {
        let mut pending: Vec<usize> = Vec::new();
        let mut ordering: Vec<usize> = Vec::new();
        let mut ordered: HashSet<usize> = HashSet::new();
        for &id in self.sccs.keys() {
            if self.bg_contains_scc(id) {
                continue;
            }
            let dependents = self.cols_by_row.get(&id).map(Vec::as_slice).unwrap_or(&[]);
            if dependents.is_empty() {
                ordering.push(id);
                ordered.insert(id);
            } else {
                pending.push(id);
            }
        }

        while !pending.is_empty() {
            let mut emitted = false;
            pending.retain(|&id| {
                let ready = self
                    .cols_by_row
                    .get(&id)
                    .map(Vec::as_slice)
                    .unwrap_or(&[])
                    .iter()
                    .all(|&dep| dep == id || ordered.contains(&dep));
                if ready {
                    ordering.push(id);
                    ordered.insert(id);
                    emitted = true;
                }
                !ready
            });
            if !emitted {
                warn!(
                    remaining = pending.len(),
                    "foreground ordering stalled on a cyclic component"
                );
                ordering.extend(pending.iter().copied());
                break;
            }
        }

        ordering
            .into_iter()
            .flat_map(|id| self.scc(id).iter().copied().collect::<Vec<_>>())
            .collect()
    }
}
