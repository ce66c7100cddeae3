//! Dense symmetric indefinite factorization with inertia.
//!
//! The interior point solver needs more than a solve of its KKT system: it has to know how
//! many positive and negative eigenvalues the system has to tell whether the Hessian is
//! convex on the constraints' null space. `P A P' = L D L'` with Bunch-Kaufman pivoting gives
//! both, since D is block diagonal with 1x1 and 2x2 blocks whose signs are the inertia.

use nalgebra::{DMatrix, DVector};

/// (1 + sqrt(17)) / 8, bounds element growth of the pivoting
const PIVOT_ALPHA: f64 = 0.640_388_203_202_208;

/// pivots below this fraction of the largest entry count as zero
const ZERO_PIVOT: f64 = 1e-13;

/// Number of positive, negative and zero eigenvalues of a symmetric matrix
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub(crate) struct Inertia {
    pub positive: usize,
    pub negative: usize,
    pub zero: usize,
}

#[derive(Debug, Copy, Clone)]
enum Pivot {
    Single(usize),
    Pair(usize),
}

/// `P A P' = L D L'` of a symmetric matrix
#[derive(Debug)]
pub(crate) struct Ldl {
    /// unit lower triangular L below the block diagonal, D on it
    factors: DMatrix<f64>,
    /// row `i` of the factored matrix is row `permutation[i]` of the original
    permutation: Vec<usize>,
    pivots: Vec<Pivot>,
    inertia: Inertia,
    tolerance: f64,
}

impl Ldl {
    /// Factors `matrix`, which must be symmetric; only ever fails to produce usable
    /// factors for singular input, which shows up as zero eigenvalues in the inertia
    pub(crate) fn factor(matrix: &DMatrix<f64>) -> Ldl {
        let n = matrix.nrows();
        let mut a = matrix.clone();
        let mut permutation: Vec<usize> = (0..n).collect();
        let mut pivots = Vec::with_capacity(n);
        let mut inertia = Inertia::default();
        let tolerance = ZERO_PIVOT * matrix.amax().max(1.);

        let mut k = 0;
        while k < n {
            let diagonal = a[(k, k)].abs();
            let (largest_row, column_max) =
                (k + 1..n).map(|i| (i, a[(i, k)].abs())).fold((k, 0.), |best, entry| {
                    if entry.1 > best.1 {
                        entry
                    } else {
                        best
                    }
                });

            let pair = if diagonal >= PIVOT_ALPHA * column_max || column_max <= tolerance {
                false
            } else {
                let row_max = (k..n)
                    .filter(|&j| j != largest_row)
                    .map(|j| a[(largest_row, j)].abs())
                    .fold(0., f64::max);
                if diagonal * row_max >= PIVOT_ALPHA * column_max * column_max {
                    false
                } else if a[(largest_row, largest_row)].abs() >= PIVOT_ALPHA * row_max {
                    swap(&mut a, &mut permutation, k, largest_row);
                    false
                } else {
                    swap(&mut a, &mut permutation, k + 1, largest_row);
                    true
                }
            };

            if pair {
                eliminate_pair(&mut a, k, &mut inertia, tolerance);
                pivots.push(Pivot::Pair(k));
                k += 2;
            } else {
                eliminate_single(&mut a, k, &mut inertia, tolerance);
                pivots.push(Pivot::Single(k));
                k += 1;
            }
        }

        Ldl { factors: a, permutation, pivots, inertia, tolerance }
    }

    pub(crate) fn inertia(&self) -> Inertia {
        self.inertia
    }

    /// Solves `A x = b`; components along zero pivots come out as zero
    pub(crate) fn solve(&self, b: &DVector<f64>) -> DVector<f64> {
        let n = self.permutation.len();
        let l = &self.factors;
        let mut w = DVector::from_iterator(n, self.permutation.iter().map(|&p| b[p]));

        for pivot in self.pivots.iter() {
            match *pivot {
                Pivot::Single(k) => {
                    for i in k + 1..n {
                        w[i] -= l[(i, k)] * w[k];
                    }
                }
                Pivot::Pair(k) => {
                    for i in k + 2..n {
                        w[i] -= l[(i, k)] * w[k] + l[(i, k + 1)] * w[k + 1];
                    }
                }
            }
        }

        for pivot in self.pivots.iter() {
            match *pivot {
                Pivot::Single(k) => {
                    let d = l[(k, k)];
                    w[k] = if d.abs() <= self.tolerance { 0. } else { w[k] / d };
                }
                Pivot::Pair(k) => {
                    let (d11, d21, d22) = (l[(k, k)], l[(k + 1, k)], l[(k + 1, k + 1)]);
                    let det = d11 * d22 - d21 * d21;
                    let (w1, w2) = (w[k], w[k + 1]);
                    w[k] = (d22 * w1 - d21 * w2) / det;
                    w[k + 1] = (d11 * w2 - d21 * w1) / det;
                }
            }
        }

        for pivot in self.pivots.iter().rev() {
            match *pivot {
                Pivot::Single(k) => {
                    let correction: f64 = (k + 1..n).map(|i| l[(i, k)] * w[i]).sum();
                    w[k] -= correction;
                }
                Pivot::Pair(k) => {
                    let first: f64 = (k + 2..n).map(|i| l[(i, k)] * w[i]).sum();
                    let second: f64 = (k + 2..n).map(|i| l[(i, k + 1)] * w[i]).sum();
                    w[k] -= first;
                    w[k + 1] -= second;
                }
            }
        }

        let mut x = DVector::zeros(n);
        for (i, &p) in self.permutation.iter().enumerate() {
            x[p] = w[i];
        }
        x
    }
}

/// symmetric interchange of rows and columns `p` and `q`
fn swap(a: &mut DMatrix<f64>, permutation: &mut [usize], p: usize, q: usize) {
    if p != q {
        a.swap_rows(p, q);
        a.swap_columns(p, q);
        permutation.swap(p, q);
    }
}

fn eliminate_single(a: &mut DMatrix<f64>, k: usize, inertia: &mut Inertia, tolerance: f64) {
    let n = a.nrows();
    let d = a[(k, k)];
    if d.abs() <= tolerance {
        inertia.zero += 1;
        for i in k + 1..n {
            a[(i, k)] = 0.;
            a[(k, i)] = 0.;
        }
        return;
    }
    if d > 0. {
        inertia.positive += 1;
    } else {
        inertia.negative += 1;
    }

    let column: Vec<f64> = (k + 1..n).map(|i| a[(i, k)]).collect();
    for (jj, j) in (k + 1..n).enumerate() {
        if column[jj] == 0. {
            continue;
        }
        let scaled = column[jj] / d;
        for (ii, i) in (j..n).enumerate().map(|(offset, i)| (jj + offset, i)) {
            a[(i, j)] -= column[ii] * scaled;
            a[(j, i)] = a[(i, j)];
        }
    }
    for (ii, i) in (k + 1..n).enumerate() {
        a[(i, k)] = column[ii] / d;
        a[(k, i)] = a[(i, k)];
    }
}

fn eliminate_pair(a: &mut DMatrix<f64>, k: usize, inertia: &mut Inertia, tolerance: f64) {
    let n = a.nrows();
    let (d11, d21, d22) = (a[(k, k)], a[(k + 1, k)], a[(k + 1, k + 1)]);
    let det = d11 * d22 - d21 * d21;
    if det < 0. {
        inertia.positive += 1;
        inertia.negative += 1;
    } else if det.abs() <= tolerance * tolerance {
        inertia.zero += 2;
    } else if d11 + d22 > 0. {
        inertia.positive += 2;
    } else {
        inertia.negative += 2;
    }

    let first: Vec<f64> = (k + 2..n).map(|i| a[(i, k)]).collect();
    let second: Vec<f64> = (k + 2..n).map(|i| a[(i, k + 1)]).collect();
    let pairs = || first.iter().zip(second.iter());
    let l1: Vec<f64> = pairs().map(|(w1, w2)| (w1 * d22 - w2 * d21) / det).collect();
    let l2: Vec<f64> = pairs().map(|(w1, w2)| (w2 * d11 - w1 * d21) / det).collect();

    for (jj, j) in (k + 2..n).enumerate() {
        for (ii, i) in (j..n).enumerate().map(|(offset, i)| (jj + offset, i)) {
            a[(i, j)] -= l1[ii] * first[jj] + l2[ii] * second[jj];
            a[(j, i)] = a[(i, j)];
        }
    }
    for (ii, i) in (k + 2..n).enumerate() {
        a[(i, k)] = l1[ii];
        a[(k, i)] = l1[ii];
        a[(i, k + 1)] = l2[ii];
        a[(k + 1, i)] = l2[ii];
    }
}
