//! UMAP onto two dimensions.
//!
//! Builds a fuzzy k-nearest-neighbor graph under cosine distance, then lays it
//! out with seeded stochastic gradient descent using attractive moves along
//! graph edges and repulsive moves against negative samples. The graph is kept
//! dense: inputs here are (papers x facets) rows, not millions of points.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{ReductionError, ReductionMethod, neighborhood_size};

const SMOOTH_K_STEPS: usize = 64;
const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const MIN_K_DIST_SCALE: f64 = 1e-3;
const GRADIENT_CLIP: f64 = 4.0;

#[derive(Debug, Clone, PartialEq)]
pub struct UmapParams {
    /// Neighbors per point, the point itself included.
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub epochs: usize,
    pub negative_sample_rate: usize,
    pub repulsion_strength: f64,
    pub initial_alpha: f64,
}

impl UmapParams {
    /// Defaults for `samples` points, neighbors clamped to `[2, 30]`.
    pub fn for_samples(samples: usize) -> Self {
        Self {
            n_neighbors: neighborhood_size(samples),
            min_dist: 0.01,
            spread: 1.0,
            epochs: if samples <= 10_000 { 500 } else { 200 },
            negative_sample_rate: 5,
            repulsion_strength: 1.0,
            initial_alpha: 1.0,
        }
    }
}

pub fn fit_transform(
    matrix: &Array2<f64>,
    params: &UmapParams,
    seed: u64,
) -> Result<Array2<f64>, ReductionError> {
    let n = matrix.nrows();
    if n < 2 {
        return Err(ReductionError::TooFewSamples {
            method: ReductionMethod::Umap,
            needed: 2,
            got: n,
        });
    }
    if params.n_neighbors < 2 || params.n_neighbors > n - 1 {
        return Err(ReductionError::InvalidNeighborhood {
            method: ReductionMethod::Umap,
            size: params.n_neighbors as f64,
            samples: n,
        });
    }

    let (indices, distances) = nearest_neighbors(matrix, params.n_neighbors);
    let (sigmas, rhos) = smooth_knn_dist(&distances, params.n_neighbors as f64);
    let graph = fuzzy_union(&indices, &distances, &sigmas, &rhos);
    let (a, b) = find_ab_params(params.spread, params.min_dist);
    tracing::debug!(a, b, n_neighbors = params.n_neighbors, "UMAP curve parameters");

    let mut rng = StdRng::seed_from_u64(seed);
    let mut embedding = random_init(n, &mut rng);
    optimize_layout(&mut embedding, &graph, a, b, params, &mut rng);

    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(ReductionError::Degenerate {
            method: ReductionMethod::Umap,
            reason: "optimization diverged".into(),
        });
    }
    Ok(embedding)
}

/// `1 - cos(u, v)`; a zero vector is at distance 1 from everything but
/// another zero vector.
fn cosine_distance(u: ndarray::ArrayView1<f64>, v: ndarray::ArrayView1<f64>) -> f64 {
    let nu = u.dot(&u);
    let nv = v.dot(&v);
    match (nu == 0.0, nv == 0.0) {
        (true, true) => 0.0,
        (true, false) | (false, true) => 1.0,
        _ => (1.0 - u.dot(&v) / (nu * nv).sqrt()).max(0.0),
    }
}

/// Exact k-nearest neighbors, each row starting with the point itself.
fn nearest_neighbors(matrix: &Array2<f64>, k: usize) -> (Array2<usize>, Array2<f64>) {
    let n = matrix.nrows();
    let mut indices = Array2::<usize>::zeros((n, k));
    let mut distances = Array2::<f64>::zeros((n, k));
    for i in 0..n {
        let mut row: Vec<(f64, usize)> = (0..n)
            .map(|j| {
                let d = if i == j {
                    0.0
                } else {
                    cosine_distance(matrix.row(i), matrix.row(j))
                };
                (d, j)
            })
            .collect();
        // Self first on ties, then by index for determinism.
        row.sort_by(|x, y| {
            x.0.total_cmp(&y.0)
                .then_with(|| (x.1 != i).cmp(&(y.1 != i)))
                .then_with(|| x.1.cmp(&y.1))
        });
        for (slot, (d, j)) in row.into_iter().take(k).enumerate() {
            indices[[i, slot]] = j;
            distances[[i, slot]] = d;
        }
    }
    (indices, distances)
}

/// Per-point bandwidth `sigma` and local connectivity distance `rho` such that
/// the fuzzy memberships of each neighborhood sum to `log2(k)`.
fn smooth_knn_dist(distances: &Array2<f64>, k: f64) -> (Array1<f64>, Array1<f64>) {
    let n = distances.nrows();
    let target = k.log2();
    let mean_all = distances.mean().unwrap_or(0.0);
    let mut sigmas = Array1::<f64>::zeros(n);
    let mut rhos = Array1::<f64>::zeros(n);

    for i in 0..n {
        let row = distances.row(i);
        rhos[i] = row.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);

        let (mut lo, mut hi, mut mid) = (0.0_f64, f64::INFINITY, 1.0_f64);
        for _ in 0..SMOOTH_K_STEPS {
            let psum: f64 = row
                .iter()
                .skip(1)
                .map(|&d| {
                    let d = d - rhos[i];
                    if d > 0.0 { (-d / mid).exp() } else { 1.0 }
                })
                .sum();
            if (psum - target).abs() < SMOOTH_K_TOLERANCE {
                break;
            }
            if psum > target {
                hi = mid;
                mid = (lo + hi) / 2.0;
            } else {
                lo = mid;
                mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
            }
        }

        let floor = if rhos[i] > 0.0 {
            MIN_K_DIST_SCALE * row.mean().unwrap_or(0.0)
        } else {
            MIN_K_DIST_SCALE * mean_all
        };
        sigmas[i] = mid.max(floor);
    }
    (sigmas, rhos)
}

/// Directed memberships symmetrized with the probabilistic t-conorm
/// `A + A^T - A * A^T`.
fn fuzzy_union(
    indices: &Array2<usize>,
    distances: &Array2<f64>,
    sigmas: &Array1<f64>,
    rhos: &Array1<f64>,
) -> Array2<f64> {
    let n = indices.nrows();
    let mut directed = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for (slot, &j) in indices.row(i).iter().enumerate() {
            if j == i {
                continue;
            }
            let d = distances[[i, slot]] - rhos[i];
            directed[[i, j]] = if d <= 0.0 || sigmas[i] == 0.0 {
                1.0
            } else {
                (-d / sigmas[i]).exp()
            };
        }
    }
    let transpose = directed.t();
    let product = &directed * &transpose;
    &directed + &transpose - &product
}

/// Fit `1 / (1 + a x^(2b))` to the target curve that is flat up to
/// `min_dist` and decays exponentially with `spread` after it.
pub fn find_ab_params(spread: f64, min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..300).map(|i| spread * 3.0 * i as f64 / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();

    let residual = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let r = 1.0 / (1.0 + a * x.powf(2.0 * b)) - y;
                r * r
            })
            .sum()
    };

    // Levenberg-Marquardt on (a, b).
    let (mut a, mut b) = (1.0_f64, 1.0_f64);
    let mut lambda = 1e-3;
    let mut cost = residual(a, b);
    for _ in 0..200 {
        let (mut jtj, mut jtr) = ([[0.0_f64; 2]; 2], [0.0_f64; 2]);
        for (&x, &y) in xs.iter().zip(&ys) {
            if x <= 0.0 {
                continue;
            }
            let u = x.powf(2.0 * b);
            let denom = 1.0 + a * u;
            let f = 1.0 / denom;
            let r = f - y;
            let da = -u / (denom * denom);
            let db = -a * u * 2.0 * x.ln() / (denom * denom);
            jtj[0][0] += da * da;
            jtj[0][1] += da * db;
            jtj[1][1] += db * db;
            jtr[0] += da * r;
            jtr[1] += db * r;
        }
        jtj[1][0] = jtj[0][1];

        let m00 = jtj[0][0] * (1.0 + lambda);
        let m11 = jtj[1][1] * (1.0 + lambda);
        let det = m00 * m11 - jtj[0][1] * jtj[1][0];
        if det.abs() < 1e-300 {
            break;
        }
        let step_a = -(m11 * jtr[0] - jtj[0][1] * jtr[1]) / det;
        let step_b = -(m00 * jtr[1] - jtj[1][0] * jtr[0]) / det;
        let (na, nb) = (a + step_a, b + step_b);
        let next = if na > 0.0 && nb > 0.0 {
            residual(na, nb)
        } else {
            f64::INFINITY
        };
        if next < cost {
            let improvement = cost - next;
            a = na;
            b = nb;
            cost = next;
            lambda = (lambda / 10.0).max(1e-12);
            if improvement < 1e-14 {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }
    }
    (a, b)
}

/// Uniform points in `[-10, 10]^2`, rescaled per axis to `[0, 10]`.
fn random_init(n: usize, rng: &mut StdRng) -> Array2<f64> {
    let mut embedding = Array2::from_shape_fn((n, 2), |_| rng.gen_range(-10.0..10.0));
    for mut column in embedding.columns_mut() {
        let min = column.iter().copied().fold(f64::INFINITY, f64::min);
        let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;
        if span > 0.0 {
            column.mapv_inplace(|v| 10.0 * (v - min) / span);
        }
    }
    embedding
}

struct Edge {
    head: usize,
    tail: usize,
    epochs_per_sample: f64,
}

fn optimize_layout(
    embedding: &mut Array2<f64>,
    graph: &Array2<f64>,
    a: f64,
    b: f64,
    params: &UmapParams,
    rng: &mut StdRng,
) {
    let n = embedding.nrows();
    let epochs = params.epochs;
    let max_weight = graph.iter().copied().fold(0.0_f64, f64::max);
    if max_weight <= 0.0 || epochs == 0 {
        return;
    }

    // Edges too weak to be sampled even once are dropped.
    let threshold = max_weight / epochs as f64;
    let mut edges = Vec::new();
    for ((head, tail), &w) in graph.indexed_iter() {
        if head == tail || w <= 0.0 || w < threshold {
            continue;
        }
        let samples = epochs as f64 * w / max_weight;
        edges.push(Edge {
            head,
            tail,
            epochs_per_sample: epochs as f64 / samples,
        });
    }

    let negative_rate = params.negative_sample_rate as f64;
    let mut next_sample: Vec<f64> = edges.iter().map(|e| e.epochs_per_sample).collect();
    let mut next_negative: Vec<f64> = edges
        .iter()
        .map(|e| e.epochs_per_sample / negative_rate)
        .collect();

    for epoch in 0..epochs {
        let alpha = params.initial_alpha * (1.0 - epoch as f64 / epochs as f64);
        let now = epoch as f64;

        for (e, edge) in edges.iter().enumerate() {
            if next_sample[e] > now {
                continue;
            }
            let (j, k) = (edge.head, edge.tail);

            let dist2 = squared(embedding, j, k);
            let coeff = if dist2 > 0.0 {
                -2.0 * a * b * dist2.powf(b - 1.0) / (a * dist2.powf(b) + 1.0)
            } else {
                0.0
            };
            for d in 0..2 {
                let grad = clip(coeff * (embedding[[j, d]] - embedding[[k, d]]));
                embedding[[j, d]] += grad * alpha;
                embedding[[k, d]] -= grad * alpha;
            }
            next_sample[e] += edge.epochs_per_sample;

            let per_negative = edge.epochs_per_sample / negative_rate;
            let negatives = ((now - next_negative[e]) / per_negative).floor().max(0.0) as usize;
            for _ in 0..negatives {
                let other = rng.gen_range(0..n);
                if other == j {
                    continue;
                }
                let dist2 = squared(embedding, j, other);
                let coeff = if dist2 > 0.0 {
                    2.0 * params.repulsion_strength * b
                        / ((0.001 + dist2) * (a * dist2.powf(b) + 1.0))
                } else {
                    0.0
                };
                if coeff <= 0.0 {
                    continue;
                }
                for d in 0..2 {
                    let grad = clip(coeff * (embedding[[j, d]] - embedding[[other, d]]));
                    embedding[[j, d]] += grad * alpha;
                }
            }
            next_negative[e] += negatives as f64 * per_negative;
        }
    }
}

fn squared(embedding: &Array2<f64>, i: usize, j: usize) -> f64 {
    let dx = embedding[[i, 0]] - embedding[[j, 0]];
    let dy = embedding[[i, 1]] - embedding[[j, 1]];
    dx * dx + dy * dy
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}
