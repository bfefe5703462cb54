use ndarray::{Array1, ArrayView1};
use tracing::debug;

use crate::solver::csc::CscMatrix;

/// Relative 1-norm increment below which the series is considered converged.
pub const DEFAULT_THRESHOLD: f64 = 1e-8;
/// Maximum number of matrix applications.
pub const DEFAULT_COUNT: usize = 100;

/// Accumulate `total = sum_k A^k ad` by iterative multiplication, stopping
/// when the increment's 1-norm falls below `threshold` relative to the sum of
/// all increments so far, and return `(total, b_matrix * total)`.
///
/// Neither matrix is mutated.  An exactly-zero increment terminates the
/// series with the exact result.
pub fn iterate_lci(
    a_matrix: &CscMatrix,
    b_matrix: &CscMatrix,
    ad: ArrayView1<f64>,
    threshold: f64,
    count: usize,
) -> (Array1<f64>, Array1<f64>) {
    debug_assert_eq!(a_matrix.dim.nrows, a_matrix.dim.ncols);
    debug_assert_eq!(ad.len(), a_matrix.dim.ncols);

    let mut x = ad.to_owned();
    let mut total = Array1::zeros(ad.len());
    let mut sumtotal = 0.0;
    let mut iterations = 0;

    while iterations < count {
        total += &x;
        x = a_matrix.matvec(x.view());
        let inc: f64 = x.iter().map(|v| v.abs()).sum();
        if inc == 0.0 {
            debug!(iterations, "exact result");
            break;
        }
        sumtotal += inc;
        if inc / sumtotal < threshold {
            break;
        }
        iterations += 1;
    }
    debug!(iterations, "completed background LCI iteration");

    let b = b_matrix.matvec(total.view());
    (total, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::csc::CscBuilder;
    use ndarray::array;

    #[test]
    fn nilpotent_system_terminates_exactly() {
        // A strictly lower-triangular: series ends after two applications.
        let mut b = CscBuilder::new(3, 3);
        b.push(1, 0, 0.5).unwrap();
        b.push(2, 1, 0.5).unwrap();
        let a = b.build();
        let bm = CscMatrix::zeros(0, 3);

        let ad = array![1.0, 0.0, 0.0];
        let (total, _) = iterate_lci(&a, &bm, ad.view(), DEFAULT_THRESHOLD, DEFAULT_COUNT);
        assert_eq!(total, array![1.0, 0.5, 0.25]);
    }

    #[test]
    fn geometric_system_converges_to_inverse() {
        // A = [[0.5]] -> (I - A)^-1 ad = 2 ad
        let mut b = CscBuilder::new(1, 1);
        b.push(0, 0, 0.5).unwrap();
        let a = b.build();
        let bm = CscMatrix::zeros(0, 1);

        let ad = array![1.0];
        let (total, _) = iterate_lci(&a, &bm, ad.view(), 1e-12, 200);
        assert!((total[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn emissions_follow_the_total() {
        let a = CscMatrix::zeros(2, 2);
        let mut bb = CscBuilder::new(1, 2);
        bb.push(0, 0, 3.0).unwrap();
        bb.push(0, 1, 4.0).unwrap();
        let bm = bb.build();

        let ad = array![1.0, 2.0];
        let (total, b) = iterate_lci(&a, &bm, ad.view(), DEFAULT_THRESHOLD, DEFAULT_COUNT);
        assert_eq!(total, ad);
        assert_eq!(b, array![11.0]);
    }
}
