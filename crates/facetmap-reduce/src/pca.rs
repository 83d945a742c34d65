//! Principal component analysis onto two components.
//!
//! The leading eigenpairs come from power iteration with deflation on
//! whichever of the Gram (N x N) or covariance (D x D) matrix is smaller.
//! Facet matrices are short and wide, so this is usually the Gram matrix.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::{ReductionError, ReductionMethod};

const COMPONENTS: usize = 2;
const MAX_ITERATIONS: usize = 1000;
const TOLERANCE: f64 = 1e-12;

/// Project `matrix` onto its first two principal components.
///
/// Each component's sign is fixed so that its largest-magnitude score is
/// positive, which keeps the output stable across runs.
pub fn fit_transform(matrix: &Array2<f64>, seed: u64) -> Result<Array2<f64>, ReductionError> {
    let (n, d) = matrix.dim();
    if n < 2 {
        return Err(ReductionError::TooFewSamples {
            method: ReductionMethod::Pca,
            needed: 2,
            got: n,
        });
    }
    if d < COMPONENTS {
        return Err(ReductionError::TooFewFeatures {
            method: ReductionMethod::Pca,
            needed: COMPONENTS,
            got: d,
        });
    }

    let mean = matrix.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
    let centered = matrix - &mean;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut scores = component_scores(&centered, n <= d, &mut rng)?;

    for mut column in scores.columns_mut() {
        let pivot = column
            .iter()
            .copied()
            .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
        if pivot < 0.0 {
            column.mapv_inplace(|x| -x);
        }
    }
    Ok(scores)
}

/// Scores on the two leading components of already-centered data, through
/// the Gram matrix (`X X^T`) or the covariance matrix (`X^T X`).
fn component_scores(
    centered: &Array2<f64>,
    via_gram: bool,
    rng: &mut StdRng,
) -> Result<Array2<f64>, ReductionError> {
    let mut scores = Array2::<f64>::zeros((centered.nrows(), COMPONENTS));
    if via_gram {
        let gram = centered.dot(&centered.t());
        let pairs = leading_eigenpairs(gram, COMPONENTS, rng);
        check_variance(pairs[0].0)?;
        for (k, (value, vector)) in pairs.into_iter().enumerate() {
            let scale = value.max(0.0).sqrt();
            scores.column_mut(k).assign(&(vector * scale));
        }
    } else {
        let covariance = centered.t().dot(centered);
        let pairs = leading_eigenpairs(covariance, COMPONENTS, rng);
        check_variance(pairs[0].0)?;
        for (k, (_, vector)) in pairs.into_iter().enumerate() {
            scores.column_mut(k).assign(&centered.dot(&vector));
        }
    }
    Ok(scores)
}

fn check_variance(top: f64) -> Result<(), ReductionError> {
    if top <= f64::EPSILON {
        return Err(ReductionError::Degenerate {
            method: ReductionMethod::Pca,
            reason: "all rows are identical".into(),
        });
    }
    Ok(())
}

/// The `count` largest eigenpairs of a symmetric positive semi-definite matrix.
fn leading_eigenpairs(
    mut matrix: Array2<f64>,
    count: usize,
    rng: &mut StdRng,
) -> Vec<(f64, Array1<f64>)> {
    let n = matrix.nrows();
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let (value, vector) = power_iteration(&matrix, rng);
        // Deflate: A <- A - lambda * v * v^T
        for i in 0..n {
            for j in 0..n {
                matrix[[i, j]] -= value * vector[i] * vector[j];
            }
        }
        pairs.push((value, vector));
    }
    pairs
}

fn power_iteration(matrix: &Array2<f64>, rng: &mut StdRng) -> (f64, Array1<f64>) {
    let n = matrix.nrows();
    let mut v: Array1<f64> = (0..n).map(|_| rng.sample::<f64, _>(StandardNormal)).collect();
    let norm = v.dot(&v).sqrt();
    if norm > 0.0 {
        v /= norm;
    }

    let mut eigenvalue = 0.0;
    for _ in 0..MAX_ITERATIONS {
        let av = matrix.dot(&v);
        let next_value = v.dot(&av);
        let norm = av.dot(&av).sqrt();
        if norm <= 1e-300 {
            // Remaining spectrum is zero: any unit vector is an eigenvector.
            return (0.0, v);
        }
        let next = av / norm;
        let delta = (&next - &v).mapv(f64::abs).sum();
        v = next;
        let settled = (next_value - eigenvalue).abs() <= TOLERANCE * next_value.abs().max(1.0);
        eigenvalue = next_value;
        if settled && delta <= 1e-10 {
            break;
        }
    }
    (v.dot(&matrix.dot(&v)), v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn recovers_dominant_axis() {
        // Spread along x; y is small and uncorrelated with x.
        let m = array![
            [-3.0, 0.1, 0.0],
            [-1.0, -0.1, 0.0],
            [1.0, -0.1, 0.0],
            [3.0, 0.1, 0.0]
        ];
        let scores = fit_transform(&m, 42).unwrap();
        assert_eq!(scores.dim(), (4, 2));
        for (got, want) in scores.column(0).iter().zip([3.0, 1.0, 1.0, 3.0]) {
            assert!((got.abs() - want).abs() < 1e-6, "{got} vs {want}");
        }
        for (got, want) in scores.column(1).iter().zip([0.1, 0.1, 0.1, 0.1]) {
            assert!((got.abs() - want).abs() < 1e-6, "{got} vs {want}");
        }
        // Scores along a component keep the data's relative order.
        assert!(scores[[0, 0]] * scores[[3, 0]] < 0.0);
    }

    #[test]
    fn largest_score_is_positive() {
        let m = array![[0.0, 1.0], [1.0, 0.0], [5.0, 2.0], [-1.0, 0.5]];
        let scores = fit_transform(&m, 42).unwrap();
        for column in scores.columns() {
            let pivot = column
                .iter()
                .copied()
                .fold(0.0_f64, |b, x| if x.abs() > b.abs() { x } else { b });
            assert!(pivot > 0.0);
        }
    }

    #[test]
    fn gram_and_covariance_paths_agree() {
        let m = array![
            [1.0, 2.0, 0.0, 4.0, 1.0],
            [2.0, 0.0, 1.0, 3.0, 0.0],
            [0.0, 1.0, 3.0, 1.0, 2.0],
            [4.0, 1.0, 0.0, 0.0, 1.0]
        ];
        let mean = m.mean_axis(Axis(0)).unwrap();
        let centered = &m - &mean;
        let via_gram = component_scores(&centered, true, &mut StdRng::seed_from_u64(1)).unwrap();
        let via_cov = component_scores(&centered, false, &mut StdRng::seed_from_u64(2)).unwrap();
        for k in 0..COMPONENTS {
            let a = via_gram.column(k);
            let b = via_cov.column(k);
            let sign = if a.dot(&b) < 0.0 { -1.0 } else { 1.0 };
            for (x, y) in a.iter().zip(b.iter()) {
                assert!((x - sign * y).abs() < 1e-6, "{x} vs {y}");
            }
        }
    }

    #[test]
    fn tall_input_scores_are_centered() {
        let m = Array2::from_shape_fn((12, 3), |(i, j)| ((i * 5 + j * 11) % 7) as f64);
        let scores = fit_transform(&m, 3).unwrap();
        assert_eq!(scores.dim(), (12, 2));
        for column in scores.columns() {
            assert!(column.sum().abs() < 1e-8);
        }
    }

    #[test]
    fn same_seed_same_output() {
        let m = Array2::from_shape_fn((6, 8), |(i, j)| ((i * 7 + j * 3) % 5) as f64);
        assert_eq!(fit_transform(&m, 42).unwrap(), fit_transform(&m, 42).unwrap());
    }

    #[test]
    fn rejects_tiny_inputs() {
        assert!(matches!(
            fit_transform(&Array2::zeros((1, 4)), 42),
            Err(ReductionError::TooFewSamples { .. })
        ));
        assert!(matches!(
            fit_transform(&Array2::zeros((4, 1)), 42),
            Err(ReductionError::TooFewFeatures { .. })
        ));
    }

    #[test]
    fn identical_rows_are_degenerate() {
        let m = Array2::from_elem((3, 4), 0.5);
        assert!(matches!(
            fit_transform(&m, 42),
            Err(ReductionError::Degenerate { .. })
        ));
    }
}
