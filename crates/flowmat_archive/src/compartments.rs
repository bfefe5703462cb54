use std::collections::HashSet;

use crate::entities::Flow;

/// Decides whether an exterior flow is an elementary (environmental) exchange
/// or a cutoff, based on the root segment of its compartment path.
#[derive(Debug, Clone)]
pub struct CompartmentClassifier {
    elementary: HashSet<String>,
}

impl Default for CompartmentClassifier {
    fn default() -> Self {
        // Ecoinvent + USLCI root compartments.
        Self::new(["air", "water", "soil", "natural resource", "resource"])
    }
}

impl CompartmentClassifier {
    pub fn new<I, S>(elementary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            elementary: elementary
                .into_iter()
                .map(|s| s.into().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_elementary(&self, flow: &Flow) -> bool {
        flow.root_compartment()
            .map(|root| self.elementary.contains(&root.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}
