//! Exact t-SNE (O(N^2) per iteration) onto two dimensions.
//!
//! Joint probabilities come from a per-point binary search on the Gaussian
//! precision matching the requested perplexity; the layout starts from a small
//! seeded Gaussian cloud and is optimized with momentum gradient descent and
//! per-parameter gains, with early exaggeration for the first iterations.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::{ReductionError, ReductionMethod, neighborhood_size};

const MACHINE_EPSILON: f64 = f64::EPSILON;
const SEARCH_STEPS: usize = 100;
const SEARCH_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Clone, PartialEq)]
pub struct TsneParams {
    pub perplexity: f64,
    pub early_exaggeration: f64,
    /// `None` selects `max(N / early_exaggeration / 4, 50)`.
    pub learning_rate: Option<f64>,
    pub iterations: usize,
    pub exaggeration_iterations: usize,
    pub initial_momentum: f64,
    pub final_momentum: f64,
    pub min_gain: f64,
    /// Standard deviation of the random initial layout.
    pub init_scale: f64,
}

impl TsneParams {
    /// Defaults for `samples` points, perplexity clamped to `[2, 30]`.
    pub fn for_samples(samples: usize) -> Self {
        Self {
            perplexity: neighborhood_size(samples) as f64,
            early_exaggeration: 6.0,
            learning_rate: None,
            iterations: 1000,
            exaggeration_iterations: 250,
            initial_momentum: 0.5,
            final_momentum: 0.8,
            min_gain: 0.01,
            init_scale: 1e-4,
        }
    }

    pub fn learning_rate_for(&self, samples: usize) -> f64 {
        self.learning_rate
            .unwrap_or_else(|| (samples as f64 / self.early_exaggeration / 4.0).max(50.0))
    }
}

pub fn fit_transform(
    matrix: &Array2<f64>,
    params: &TsneParams,
    seed: u64,
) -> Result<Array2<f64>, ReductionError> {
    let n = matrix.nrows();
    if n < 2 {
        return Err(ReductionError::TooFewSamples {
            method: ReductionMethod::Tsne,
            needed: 2,
            got: n,
        });
    }
    if !(params.perplexity > 0.0) || params.perplexity >= n as f64 {
        return Err(ReductionError::InvalidNeighborhood {
            method: ReductionMethod::Tsne,
            size: params.perplexity,
            samples: n,
        });
    }

    let distances = squared_distances(matrix);
    let p = joint_probabilities(&distances, params.perplexity);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut y = Array2::from_shape_fn((n, 2), |_| {
        params.init_scale * rng.sample::<f64, _>(StandardNormal)
    });
    let mut update = Array2::<f64>::zeros((n, 2));
    let mut gains = Array2::<f64>::ones((n, 2));
    let learning_rate = params.learning_rate_for(n);

    let exaggerated = &p * params.early_exaggeration;
    for iteration in 0..params.iterations {
        let (pij, momentum) = if iteration < params.exaggeration_iterations {
            (&exaggerated, params.initial_momentum)
        } else {
            (&p, params.final_momentum)
        };
        let grad = gradient(pij, &y);

        for ((g, u), gain) in grad.iter().zip(update.iter_mut()).zip(gains.iter_mut()) {
            *gain = if *u * *g < 0.0 { *gain + 0.2 } else { *gain * 0.8 };
            if *gain < params.min_gain {
                *gain = params.min_gain;
            }
            *u = momentum * *u - learning_rate * *gain * *g;
        }
        y += &update;

        if iteration + 1 == params.exaggeration_iterations {
            tracing::debug!(iteration, "t-SNE early exaggeration done");
        }
    }

    if y.iter().any(|v| !v.is_finite()) {
        return Err(ReductionError::Degenerate {
            method: ReductionMethod::Tsne,
            reason: "optimization diverged".into(),
        });
    }
    Ok(y)
}

fn squared_distances(matrix: &Array2<f64>) -> Array2<f64> {
    let n = matrix.nrows();
    let mut d = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let diff = &matrix.row(i) - &matrix.row(j);
            let v = diff.dot(&diff);
            d[[i, j]] = v;
            d[[j, i]] = v;
        }
    }
    d
}

/// Row-conditional Gaussian affinities at the target perplexity, symmetrized
/// and normalized to sum to one.
fn joint_probabilities(distances: &Array2<f64>, perplexity: f64) -> Array2<f64> {
    let n = distances.nrows();
    let conditional = conditional_probabilities(distances, perplexity);
    let mut p = &conditional + &conditional.t();
    let total = p.sum().max(MACHINE_EPSILON);
    p.mapv_inplace(|v| (v / total).max(MACHINE_EPSILON));
    for i in 0..n {
        p[[i, i]] = 0.0;
    }
    p
}

fn conditional_probabilities(distances: &Array2<f64>, perplexity: f64) -> Array2<f64> {
    let n = distances.nrows();
    let desired_entropy = perplexity.ln();
    let mut p = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        let mut beta = 1.0;
        let mut beta_min = f64::NEG_INFINITY;
        let mut beta_max = f64::INFINITY;

        for _ in 0..SEARCH_STEPS {
            let mut sum_p = 0.0;
            for j in 0..n {
                let v = if j == i {
                    0.0
                } else {
                    (-distances[[i, j]] * beta).exp()
                };
                p[[i, j]] = v;
                sum_p += v;
            }
            if sum_p == 0.0 {
                sum_p = 1e-8;
            }
            let mut sum_dist_p = 0.0;
            for j in 0..n {
                p[[i, j]] /= sum_p;
                sum_dist_p += distances[[i, j]] * p[[i, j]];
            }

            let entropy = sum_p.ln() + beta * sum_dist_p;
            let diff = entropy - desired_entropy;
            if diff.abs() <= SEARCH_TOLERANCE {
                break;
            }
            if diff > 0.0 {
                beta_min = beta;
                beta = if beta_max.is_infinite() {
                    beta * 2.0
                } else {
                    (beta + beta_max) / 2.0
                };
            } else {
                beta_max = beta;
                beta = if beta_min.is_infinite() {
                    beta / 2.0
                } else {
                    (beta + beta_min) / 2.0
                };
            }
        }
    }
    p
}

/// KL gradient with Student-t (one degree of freedom) output affinities.
fn gradient(p: &Array2<f64>, y: &Array2<f64>) -> Array2<f64> {
    let n = y.nrows();
    let mut num = Array2::<f64>::zeros((n, n));
    let mut total = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = y[[i, 0]] - y[[j, 0]];
            let dy = y[[i, 1]] - y[[j, 1]];
            let v = 1.0 / (1.0 + dx * dx + dy * dy);
            num[[i, j]] = v;
            num[[j, i]] = v;
            total += 2.0 * v;
        }
    }
    let total = total.max(MACHINE_EPSILON);

    let mut grad = Array2::<f64>::zeros((n, 2));
    for i in 0..n {
        let (mut gx, mut gy) = (0.0, 0.0);
        for j in 0..n {
            if i == j {
                continue;
            }
            let q = (num[[i, j]] / total).max(MACHINE_EPSILON);
            let coeff = (p[[i, j]] - q) * num[[i, j]];
            gx += coeff * (y[[i, 0]] - y[[j, 0]]);
            gy += coeff * (y[[i, 1]] - y[[j, 1]]);
        }
        grad[[i, 0]] = 4.0 * gx;
        grad[[i, 1]] = 4.0 * gy;
    }
    grad
}
