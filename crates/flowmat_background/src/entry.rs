use crate::error::BackgroundError;
use crate::product_flow::{EmIndex, PfIndex};

// Exchanges: parent = column, term = row.  Interior values are
// direction-adjusted at creation (outputs negated, inputs entered directly);
// cutoff values keep the exchange's own sign.

/// A pending interior (technosphere) entry.
#[derive(Debug, Clone)]
pub struct MatrixEntry {
    parent: PfIndex,
    term: PfIndex,
    value: f64,
    adjusted: bool,
}

impl MatrixEntry {
    pub fn new(parent: PfIndex, term: PfIndex, value: f64) -> Self {
        Self {
            parent,
            term,
            value,
            adjusted: false,
        }
    }

    pub fn parent(&self) -> PfIndex {
        self.parent
    }

    pub fn term(&self) -> PfIndex {
        self.term
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Normalize by the parent's inbound reference magnitude.  Exactly once.
    pub fn adjust_val(&mut self, parent_inbound_ev: f64) -> Result<(), BackgroundError> {
        adjust(&mut self.value, &mut self.adjusted, parent_inbound_ev, self.parent)
    }
}

/// A pending exterior entry: an exchange with no terminating process.
#[derive(Debug, Clone)]
pub struct CutoffEntry {
    parent: PfIndex,
    emission: EmIndex,
    value: f64,
    adjusted: bool,
}

impl CutoffEntry {
    pub fn new(parent: PfIndex, emission: EmIndex, value: f64) -> Self {
        Self {
            parent,
            emission,
            value,
            adjusted: false,
        }
    }

    pub fn parent(&self) -> PfIndex {
        self.parent
    }

    pub fn emission(&self) -> EmIndex {
        self.emission
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn adjust_val(&mut self, parent_inbound_ev: f64) -> Result<(), BackgroundError> {
        adjust(&mut self.value, &mut self.adjusted, parent_inbound_ev, self.parent)
    }
}

fn adjust(
    value: &mut f64,
    adjusted: &mut bool,
    inbound_ev: f64,
    parent: PfIndex,
) -> Result<(), BackgroundError> {
    if *adjusted {
        return Err(BackgroundError::RepeatAdjustment { parent: parent.0 });
    }
    *value /= inbound_ev;
    *adjusted = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_val_divides_once_and_only_once() {
        let mut e = MatrixEntry::new(PfIndex(0), PfIndex(1), 3.0);
        e.adjust_val(2.0).unwrap();
        assert_eq!(e.value(), 1.5);
        assert!(matches!(
            e.adjust_val(2.0),
            Err(BackgroundError::RepeatAdjustment { parent: 0 })
        ));
        assert_eq!(e.value(), 1.5);
    }

    #[test]
    fn cutoff_adjustment_keeps_sign() {
        let mut e = CutoffEntry::new(PfIndex(0), EmIndex(0), -4.0);
        e.adjust_val(2.0).unwrap();
        assert_eq!(e.value(), -2.0);
    }
}
