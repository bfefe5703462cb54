use std::collections::HashMap;

use ndarray::Array1;
use tracing::debug;

use flowmat_archive::{CharacterizationDb, CompartmentClassifier, QuantityId};

use crate::background::{BackgroundManager, ForegroundMatrices};
use crate::error::BackgroundError;
use crate::product_flow::{EmIndex, Emission, PfIndex};
use crate::solver::csc::{CscBuilder, CscMatrix};
use crate::solver::dense::foreground_x_tilde;

/// A per-query foreground model: the sub-matrices needed to compute the
/// inventory and impacts of one product flow against a populated manager.
///
/// For a background product flow the fragment degenerates to column
/// extraction (1x1 zero Af, A*/B* columns for Ad/Bf).
pub struct Fragment<'a> {
    bg: &'a BackgroundManager,
    pf: PfIndex,
    /// Column ordering of Af/Ad/Bf; `None` for background product flows.
    foreground: Option<Vec<PfIndex>>,
    af: CscMatrix,
    ad: CscMatrix,
    bf: CscMatrix,
    /// Characterization rows, one per quantity: (emission row, factor).
    lcia: Vec<Vec<(usize, f64)>>,
    methods: Vec<QuantityId>,
    /// Background emission vector for ad_tilde(0), solved at most once.
    bx_cache: Option<Array1<f64>>,
}

impl<'a> Fragment<'a> {
    pub fn new(bg: &'a BackgroundManager, pf: PfIndex) -> Result<Self, BackgroundError> {
        let is_background = bg.is_background(pf);
        let ForegroundMatrices { flows, af, ad, bf } = bg.make_foreground(pf)?;
        let foreground = if is_background { None } else { Some(flows) };
        debug!(
            product_flow = %bg.label(pf),
            pdim = foreground.as_ref().map_or(0, Vec::len),
            ad_nnz = ad.nnz(),
            bf_nnz = bf.nnz(),
            "built fragment"
        );
        Ok(Self {
            bg,
            pf,
            foreground,
            af,
            ad,
            bf,
            lcia: Vec::new(),
            methods: Vec::new(),
            bx_cache: None,
        })
    }

    pub fn product_flow(&self) -> PfIndex {
        self.pf
    }

    pub fn pdim(&self) -> usize {
        self.foreground.as_ref().map_or(0, Vec::len)
    }

    pub fn ndim(&self) -> usize {
        self.bg.ndim()
    }

    pub fn mdim(&self) -> usize {
        self.bg.mdim()
    }

    /// Number of characterized LCIA methods.
    pub fn tdim(&self) -> usize {
        self.methods.len()
    }

    /// Af/Ad/Bf column ordering; empty for a background product flow.
    pub fn foreground(&self) -> &[PfIndex] {
        self.foreground.as_deref().unwrap_or(&[])
    }

    /// Ad row ordering.
    pub fn bg_flows(&self) -> Vec<PfIndex> {
        self.bg.tarjan().background_flows().collect()
    }

    /// Bf row ordering.
    pub fn emissions(&self) -> &[Emission] {
        self.bg.emissions()
    }

    pub fn af(&self) -> &CscMatrix {
        &self.af
    }

    pub fn ad(&self) -> &CscMatrix {
        &self.ad
    }

    pub fn bf(&self) -> &CscMatrix {
        &self.bf
    }

    pub fn lcia_methods(&self) -> &[QuantityId] {
        &self.methods
    }

    /// Elementary-or-not mask over emission rows.
    pub fn is_elem(&self, classifier: &CompartmentClassifier) -> Vec<bool> {
        self.emissions()
            .iter()
            .map(|em| classifier.is_elementary(self.bg.archive().flow(em.flow)))
            .collect()
    }

    /// The elementary rows of Bf, compacted, with their emission indices.
    pub fn bf_elementary(
        &self,
        classifier: &CompartmentClassifier,
    ) -> Result<(Vec<EmIndex>, CscMatrix), BackgroundError> {
        self.bf_rows(&self.is_elem(classifier), true)
    }

    /// The non-elementary (cutoff) rows of Bf, compacted.
    pub fn bf_cutoff(
        &self,
        classifier: &CompartmentClassifier,
    ) -> Result<(Vec<EmIndex>, CscMatrix), BackgroundError> {
        self.bf_rows(&self.is_elem(classifier), false)
    }

    fn bf_rows(
        &self,
        mask: &[bool],
        want: bool,
    ) -> Result<(Vec<EmIndex>, CscMatrix), BackgroundError> {
        let kept: Vec<usize> = (0..mask.len()).filter(|&i| mask[i] == want).collect();
        let remap: HashMap<usize, usize> =
            kept.iter().enumerate().map(|(n, &i)| (i, n)).collect();
        let mut builder = CscBuilder::new(kept.len(), self.bf.dim.ncols);
        for (row, col, value) in self.bf.to_triples() {
            if let Some(&r) = remap.get(&row) {
                builder.push(r, col, value)?;
            }
        }
        Ok((kept.into_iter().map(EmIndex).collect(), builder.build()))
    }

    /// Node weights for a unit output of the given foreground node.
    pub fn x_tilde(&self, node: usize) -> Result<Array1<f64>, BackgroundError> {
        match &self.foreground {
            None => Ok(Array1::ones(1)),
            Some(_) => foreground_x_tilde(&self.af, node),
        }
    }

    /// Background draw of a unit output of the given node.
    pub fn ad_tilde(&self, node: usize) -> Result<Array1<f64>, BackgroundError> {
        Ok(self.ad.matvec(self.x_tilde(node)?.view()))
    }

    /// Direct (foreground) emissions of a unit output of the given node.
    pub fn bf_tilde(&self, node: usize) -> Result<Array1<f64>, BackgroundError> {
        Ok(self.bf.matvec(self.x_tilde(node)?.view()))
    }

    /// Build a characterization row for `quantity` from the database and
    /// track the method.  Returns the number of characterized emissions.
    pub fn characterize(&mut self, db: &CharacterizationDb, quantity: QuantityId) -> usize {
        let mut row = Vec::new();
        for (m, em) in self.emissions().iter().enumerate() {
            if let Some(value) = db.lookup_cf(self.bg.archive(), em.flow, quantity) {
                row.push((m, value));
            }
        }
        let found = row.len();
        self.lcia.push(row);
        self.methods.push(quantity);
        found
    }

    /// Characterization matrix E (tdim x mdim).
    pub fn e_matrix(&self) -> Result<CscMatrix, BackgroundError> {
        let mut builder = CscBuilder::new(self.tdim(), self.mdim());
        for (t, row) in self.lcia.iter().enumerate() {
            for &(m, value) in row {
                builder.push(t, m, value)?;
            }
        }
        Ok(builder.build())
    }

    /// Scores per method for an emission vector: `E inv`.
    pub fn lcia(&self, inventory: &Array1<f64>) -> Array1<f64> {
        let mut scores = Array1::zeros(self.tdim());
        for (t, row) in self.lcia.iter().enumerate() {
            scores[t] = row.iter().map(|&(m, v)| v * inventory[m]).sum();
        }
        scores
    }

    /// Scores from the direct foreground emissions.
    pub fn fg_lcia(&self) -> Result<Array1<f64>, BackgroundError> {
        Ok(self.lcia(&self.bf_tilde(0)?))
    }

    /// Scores from the background inventory behind this fragment.  The
    /// background solve runs once and is cached.
    pub fn bg_lcia(&mut self) -> Result<Array1<f64>, BackgroundError> {
        if self.bx_cache.is_none() {
            let ad_tilde = self.ad_tilde(0)?;
            let (_total, bx) = self.bg.compute_bg_lci(&ad_tilde);
            self.bx_cache = Some(bx);
        }
        let bx = self.bx_cache.as_ref().expect("just populated");
        Ok(self.lcia(bx))
    }

    /// Scores for an arbitrary product flow's full inventory.
    pub fn pf_lcia(&self, pf: PfIndex) -> Result<Array1<f64>, BackgroundError> {
        let (_total, bx, bf_tilde) = self.bg.compute_lci(pf)?;
        Ok(self.lcia(&(bx + bf_tilde)))
    }
}
