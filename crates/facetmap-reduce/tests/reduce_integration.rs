//! End-to-end tests for [`reduce_and_plot`] and the three projections.

use std::path::Path;
use std::sync::Mutex;

use facetmap_reduce::{
    PlotRenderer, ReductionError, ReductionMethod, project, reduce_and_plot,
};
use ndarray::Array2;

/// Three tight clusters around orthogonal directions in 16 dimensions.
fn three_clusters(per_cluster: usize) -> (Array2<f64>, Vec<usize>) {
    let n = per_cluster * 3;
    let mut membership = Vec::with_capacity(n);
    let matrix = Array2::from_shape_fn((n, 16), |(i, j)| {
        let cluster = i / per_cluster;
        let noise = 0.05 * ((i * 31 + j * 17) as f64).sin();
        if j == cluster * 5 { 5.0 + noise } else { noise }
    });
    for i in 0..n {
        membership.push(i / per_cluster);
    }
    (matrix, membership)
}

fn labels(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("Paper{}: F{}", i / 5 + 1, i % 5)).collect()
}

fn mean_distances(points: &Array2<f64>, membership: &[usize]) -> (f64, f64) {
    let (mut intra, mut inter) = ((0.0, 0usize), (0.0, 0usize));
    for i in 0..points.nrows() {
        for j in (i + 1)..points.nrows() {
            let d = ((points[[i, 0]] - points[[j, 0]]).powi(2)
                + (points[[i, 1]] - points[[j, 1]]).powi(2))
            .sqrt();
            if membership[i] == membership[j] {
                intra.0 += d;
                intra.1 += 1;
            } else {
                inter.0 += d;
                inter.1 += 1;
            }
        }
    }
    (intra.0 / intra.1 as f64, inter.0 / inter.1 as f64)
}

#[test]
fn every_method_separates_clusters() {
    let (matrix, membership) = three_clusters(30);
    for method in ReductionMethod::ALL {
        let result = project(method, &matrix, 42).unwrap();
        assert_eq!(result.points.dim(), (90, 2));
        let (intra, inter) = mean_distances(&result.points, &membership);
        assert!(intra < inter, "{method}: intra {intra} >= inter {inter}");
    }
}

#[test]
fn fixed_seed_gives_identical_points() {
    let (matrix, _) = three_clusters(8);
    for method in ReductionMethod::ALL {
        let a = project(method, &matrix, 42).unwrap();
        let b = project(method, &matrix, 42).unwrap();
        assert_eq!(a.points, b.points, "{method} is not deterministic");
    }
}

#[derive(Default)]
struct RecordingRenderer {
    calls: Mutex<Vec<(String, usize, String)>>,
    fail_on: Option<&'static str>,
}

impl PlotRenderer for RecordingRenderer {
    fn render(
        &self,
        points: &Array2<f64>,
        labels: &[String],
        title: &str,
        path: &Path,
    ) -> Result<(), ReductionError> {
        if self.fail_on == Some(title) {
            return Err(ReductionError::Render("disk full".into()));
        }
        assert_eq!(points.nrows(), labels.len());
        let file = path.file_name().unwrap().to_string_lossy().into_owned();
        self.calls
            .lock()
            .unwrap()
            .push((title.to_string(), points.nrows(), file));
        Ok(())
    }
}

#[test]
fn all_three_plots_are_rendered_with_method_file_names() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("plots").join("facets");
    let (matrix, _) = three_clusters(4);
    let renderer = RecordingRenderer::default();

    let outcomes = reduce_and_plot(&matrix, &labels(12), &out, 42, &renderer).unwrap();

    assert!(out.is_dir());
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    let calls = renderer.calls.into_inner().unwrap();
    assert_eq!(
        calls,
        vec![
            ("PCA".to_string(), 12, "pca.png".to_string()),
            ("t-SNE".to_string(), 12, "t-sne.png".to_string()),
            ("UMAP".to_string(), 12, "umap.png".to_string()),
        ]
    );
    assert_eq!(
        outcomes[2].result.as_ref().unwrap(),
        &out.join("umap.png")
    );
}

#[test]
fn two_samples_fail_only_the_neighborhood_methods() {
    let dir = tempfile::tempdir().unwrap();
    let matrix = Array2::from_shape_vec((2, 3), vec![1.0, 0.0, 0.5, 0.0, 1.0, 0.5]).unwrap();
    let renderer = RecordingRenderer::default();

    let outcomes = reduce_and_plot(&matrix, &labels(2), dir.path(), 42, &renderer).unwrap();

    assert!(outcomes[0].result.is_ok());
    for outcome in &outcomes[1..] {
        assert!(matches!(
            outcome.result,
            Err(ReductionError::InvalidNeighborhood { .. })
        ));
    }
    assert_eq!(renderer.calls.into_inner().unwrap().len(), 1);
}

#[test]
fn a_render_failure_does_not_stop_later_methods() {
    let dir = tempfile::tempdir().unwrap();
    let (matrix, _) = three_clusters(3);
    let renderer = RecordingRenderer {
        fail_on: Some("PCA"),
        ..Default::default()
    };

    let outcomes = reduce_and_plot(&matrix, &labels(9), dir.path(), 42, &renderer).unwrap();

    assert!(matches!(outcomes[0].result, Err(ReductionError::Render(_))));
    assert!(outcomes[1].result.is_ok());
    assert!(outcomes[2].result.is_ok());
}

#[test]
fn label_mismatch_fails_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let (matrix, _) = three_clusters(3);
    let renderer = RecordingRenderer::default();

    let err = reduce_and_plot(&matrix, &labels(8), dir.path(), 42, &renderer).unwrap_err();

    assert!(matches!(
        err,
        ReductionError::LabelMismatch { rows: 9, labels: 8 }
    ));
    assert!(renderer.calls.into_inner().unwrap().is_empty());
}
