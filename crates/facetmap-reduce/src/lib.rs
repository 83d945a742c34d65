//! Two-dimensional projections of the facet embedding matrix.
//!
//! Three independent methods run over the same `(matrix, labels)`: a linear
//! one ([`pca`]), a manifold one ([`tsne`]) and a neighborhood-graph one
//! ([`umap`]). Each result is rendered to `{out_dir}/{method}.png`; a method
//! that fails does not stop the others.

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use thiserror::Error;

pub mod pca;
pub mod render;
pub mod tsne;
pub mod umap;

pub use render::{PlotRenderer, PlottersRenderer};

#[derive(Error, Debug)]
pub enum ReductionError {
    #[error("{method} needs at least {needed} samples, got {got}")]
    TooFewSamples {
        method: ReductionMethod,
        needed: usize,
        got: usize,
    },
    #[error("{method} needs at least {needed} features, got {got}")]
    TooFewFeatures {
        method: ReductionMethod,
        needed: usize,
        got: usize,
    },
    #[error("{method}: neighborhood size {size} is invalid for {samples} samples")]
    InvalidNeighborhood {
        method: ReductionMethod,
        size: f64,
        samples: usize,
    },
    #[error("{rows} rows but {labels} labels")]
    LabelMismatch { rows: usize, labels: usize },
    #[error("{method}: {reason}")]
    Degenerate {
        method: ReductionMethod,
        reason: String,
    },
    #[error("render failed: {0}")]
    Render(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReductionMethod {
    Pca,
    Tsne,
    Umap,
}

impl ReductionMethod {
    pub const ALL: [ReductionMethod; 3] =
        [ReductionMethod::Pca, ReductionMethod::Tsne, ReductionMethod::Umap];

    /// Display name, also the plot title.
    pub fn name(&self) -> &'static str {
        match self {
            ReductionMethod::Pca => "PCA",
            ReductionMethod::Tsne => "t-SNE",
            ReductionMethod::Umap => "UMAP",
        }
    }

    /// `pca.png`, `t-sne.png`, `umap.png`.
    pub fn file_name(&self) -> String {
        format!("{}.png", self.name().to_lowercase())
    }
}

impl fmt::Display for ReductionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Perplexity for t-SNE and neighbor count for UMAP: `max(2, min(30, n - 1))`.
pub fn neighborhood_size(samples: usize) -> usize {
    samples.saturating_sub(1).min(30).max(2)
}

/// One method's 2-D points, row-aligned with the input labels.
#[derive(Debug, Clone)]
pub struct ReductionResult {
    pub method: ReductionMethod,
    pub points: Array2<f64>,
}

/// Outcome of projecting and rendering one method.
#[derive(Debug)]
pub struct PlotOutcome {
    pub method: ReductionMethod,
    pub result: Result<PathBuf, ReductionError>,
}

/// Project `matrix` (N x D) to N x 2 with `method`.
pub fn project(
    method: ReductionMethod,
    matrix: &Array2<f64>,
    seed: u64,
) -> Result<ReductionResult, ReductionError> {
    if let Some(pos) = matrix.iter().position(|x| !x.is_finite()) {
        return Err(ReductionError::Degenerate {
            method,
            reason: format!("non-finite value at flat index {}", pos),
        });
    }
    let points = match method {
        ReductionMethod::Pca => pca::fit_transform(matrix, seed)?,
        ReductionMethod::Tsne => {
            let params = tsne::TsneParams::for_samples(matrix.nrows());
            tsne::fit_transform(matrix, &params, seed)?
        }
        ReductionMethod::Umap => {
            let params = umap::UmapParams::for_samples(matrix.nrows());
            umap::fit_transform(matrix, &params, seed)?
        }
    };
    Ok(ReductionResult { method, points })
}

/// Run all three projections and render one plot each into `out_dir`.
///
/// Fails up front only when `labels` does not match the row count or the
/// output directory cannot be created; everything else is reported per method.
pub fn reduce_and_plot(
    matrix: &Array2<f64>,
    labels: &[String],
    out_dir: &Path,
    seed: u64,
    renderer: &dyn PlotRenderer,
) -> Result<Vec<PlotOutcome>, ReductionError> {
    if matrix.nrows() != labels.len() {
        return Err(ReductionError::LabelMismatch {
            rows: matrix.nrows(),
            labels: labels.len(),
        });
    }
    std::fs::create_dir_all(out_dir).map_err(|source| ReductionError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let outcomes = ReductionMethod::ALL
        .iter()
        .map(|&method| {
            let path = out_dir.join(method.file_name());
            let result = project(method, matrix, seed)
                .and_then(|r| renderer.render(&r.points, labels, method.name(), &path))
                .map(|()| path);
            match &result {
                Ok(path) => tracing::info!(method = method.name(), path = %path.display(), "plot written"),
                Err(e) => tracing::warn!(method = method.name(), error = %e, "projection failed"),
            }
            PlotOutcome { method, result }
        })
        .collect();
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighborhood_is_clamped() {
        assert_eq!(neighborhood_size(0), 2);
        assert_eq!(neighborhood_size(2), 2);
        assert_eq!(neighborhood_size(10), 9);
        assert_eq!(neighborhood_size(31), 30);
        assert_eq!(neighborhood_size(500), 30);
    }

    #[test]
    fn file_names_are_lowercased_method_names() {
        let names: Vec<String> = ReductionMethod::ALL.iter().map(|m| m.file_name()).collect();
        assert_eq!(names, vec!["pca.png", "t-sne.png", "umap.png"]);
    }

    #[test]
    fn non_finite_input_is_degenerate() {
        let mut m = Array2::<f64>::zeros((4, 3));
        m[[2, 1]] = f64::NAN;
        assert!(matches!(
            project(ReductionMethod::Pca, &m, 42),
            Err(ReductionError::Degenerate { .. })
        ));
    }
}
