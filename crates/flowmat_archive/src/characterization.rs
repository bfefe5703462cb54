use std::collections::HashMap;

use crate::archive::Archive;
use crate::entities::{FlowId, QuantityId};

/// Impact factors per (flow, quantity) pair.
///
/// Factors registered against a concrete flow id take precedence; factors
/// registered by (flowable name, root compartment) act as a fallback for
/// flows the database does not characterize directly.
#[derive(Debug, Default)]
pub struct CharacterizationDb {
    by_flow: HashMap<(FlowId, QuantityId), f64>,
    by_flowable: HashMap<(String, String, QuantityId), f64>,
}

impl CharacterizationDb {
    /// Collect every characterization the archive's flows already carry.
    pub fn from_archive(archive: &Archive) -> Self {
        let mut db = Self::default();
        for (id, flow) in archive.flows() {
            for (&quantity, &value) in &flow.characterizations {
                db.insert(id, quantity, value);
            }
        }
        db
    }

    pub fn insert(&mut self, flow: FlowId, quantity: QuantityId, value: f64) {
        self.by_flow.insert((flow, quantity), value);
    }

    pub fn insert_flowable(
        &mut self,
        flowable: impl Into<String>,
        compartment: impl Into<String>,
        quantity: QuantityId,
        value: f64,
    ) {
        self.by_flowable.insert(
            (
                flowable.into().to_ascii_lowercase(),
                compartment.into().to_ascii_lowercase(),
                quantity,
            ),
            value,
        );
    }

    pub fn lookup_cf(
        &self,
        archive: &Archive,
        flow: FlowId,
        quantity: QuantityId,
    ) -> Option<f64> {
        if let Some(&value) = self.by_flow.get(&(flow, quantity)) {
            return Some(value);
        }
        let entity = archive.flow(flow);
        let compartment = entity.root_compartment().unwrap_or("");
        self.by_flowable
            .get(&(
                entity.name.to_ascii_lowercase(),
                compartment.to_ascii_lowercase(),
                quantity,
            ))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Flow;

    #[test]
    fn flow_factors_take_precedence_over_flowable_factors() {
        let mut archive = Archive::new("t");
        let q = archive
            .add_quantity(crate::entities::Quantity {
                uuid: "gwp".to_string(),
                name: "GWP 100".to_string(),
                unit: None,
            })
            .unwrap();
        let f = archive
            .add_flow(Flow {
                uuid: "co2".to_string(),
                name: "Carbon dioxide".to_string(),
                compartment: vec!["air".to_string()],
                characterizations: HashMap::new(),
            })
            .unwrap();

        let mut db = CharacterizationDb::from_archive(&archive);
        assert_eq!(db.lookup_cf(&archive, f, q), None);

        db.insert_flowable("carbon dioxide", "air", q, 1.0);
        assert_eq!(db.lookup_cf(&archive, f, q), Some(1.0));

        db.insert(f, q, 2.0);
        assert_eq!(db.lookup_cf(&archive, f, q), Some(2.0));
    }
}
