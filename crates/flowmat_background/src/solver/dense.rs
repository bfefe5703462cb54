use ndarray::{Array1, Array2};

use crate::error::BackgroundError;
use crate::solver::csc::CscMatrix;

/// Node-weight column for a foreground model: `x_tilde = (I - Af)^-1 e_node`.
/// Dense on purpose: foregrounds are small and acyclic by construction.
pub fn foreground_x_tilde(af: &CscMatrix, node: usize) -> Result<Array1<f64>, BackgroundError> {
    let n = af.dim.ncols;
    if n == 0 {
        return Ok(Array1::zeros(0));
    }
    let a = Array2::<f64>::eye(n) - af.to_dense();
    let mut e = Array1::zeros(n);
    e[node] = 1.0;
    lu_solve(a, e)
}

/// Solve the dense system `a x = b` by LU factorization with partial
/// pivoting, consuming `a`.  Foreground systems are small (tens of columns),
/// so a straightforward kernel beats pulling in a BLAS binding.
pub fn lu_solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>, BackgroundError> {
    let n = a.nrows();
    debug_assert_eq!(a.ncols(), n);
    debug_assert_eq!(b.len(), n);

    for k in 0..n {
        // pivot: largest magnitude in column k at or below the diagonal
        let mut pivot = k;
        let mut best = a[[k, k]].abs();
        for i in (k + 1)..n {
            let m = a[[i, k]].abs();
            if m > best {
                best = m;
                pivot = i;
            }
        }
        if best == 0.0 {
            return Err(BackgroundError::SingularForeground { col: k });
        }
        if pivot != k {
            for j in 0..n {
                a.swap([k, j], [pivot, j]);
            }
            b.swap(k, pivot);
        }

        for i in (k + 1)..n {
            let factor = a[[i, k]] / a[[k, k]];
            if factor == 0.0 {
                continue;
            }
            a[[i, k]] = 0.0;
            for j in (k + 1)..n {
                let akj = a[[k, j]];
                a[[i, j]] -= factor * akj;
            }
            let bk = b[k];
            b[i] -= factor * bk;
        }
    }

    // back substitution
    for k in (0..n).rev() {
        let mut sum = b[k];
        for j in (k + 1)..n {
            sum -= a[[k, j]] * b[j];
        }
        b[k] = sum / a[[k, k]];
    }
    Ok(b)
}
