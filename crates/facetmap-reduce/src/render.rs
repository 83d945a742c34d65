//! Labeled scatter plots.

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use ndarray::Array2;
use once_cell::sync::Lazy;
use plotters::prelude::*;
use plotters::style::{FontStyle, register_font};

use crate::ReductionError;

/// Environment variable naming a TrueType font used for titles and labels.
pub const FONT_ENV: &str = "FACETMAP_PLOT_FONT";

const FONT_FAMILY: &str = "sans-serif";

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Label text sits this fraction of the axis span away from its point.
const LABEL_OFFSET: f64 = 0.01;

/// Draws one scatter plot of 2-D points with a text label per point.
pub trait PlotRenderer: Send + Sync {
    fn render(
        &self,
        points: &Array2<f64>,
        labels: &[String],
        title: &str,
        path: &Path,
    ) -> Result<(), ReductionError>;
}

/// PNG renderer backed by `plotters`. Defaults to 2400x1800 pixels.
#[derive(Debug, Clone)]
pub struct PlottersRenderer {
    pub width: u32,
    pub height: u32,
    /// Font file for text; falls back to [`FONT_ENV`] and common system paths.
    /// Rendering fails when no font can be found.
    pub font_path: Option<PathBuf>,
}

impl Default for PlottersRenderer {
    fn default() -> Self {
        Self {
            width: 2400,
            height: 1800,
            font_path: None,
        }
    }
}

/// Fonts read so far, and the one currently registered under [`FONT_FAMILY`].
/// Plotters keeps a single process-wide registry, so renders hold this lock.
#[derive(Default)]
struct FontRegistry {
    active: Option<PathBuf>,
    loaded: HashMap<PathBuf, &'static [u8]>,
}

static FONTS: Lazy<Mutex<FontRegistry>> = Lazy::new(|| Mutex::new(FontRegistry::default()));

impl PlottersRenderer {
    /// `font_path`, else [`FONT_ENV`], else the first system font that exists.
    fn font_file(&self) -> Result<PathBuf, ReductionError> {
        let explicit = self
            .font_path
            .clone()
            .or_else(|| std::env::var_os(FONT_ENV).map(PathBuf::from));
        let system: Vec<PathBuf> = FONT_CANDIDATES.iter().map(PathBuf::from).collect();
        find_font(explicit, &system)
    }

    /// Make the resolved font the active plotters font and keep the registry
    /// locked until the returned guard drops.
    fn activate_font(&self) -> Result<MutexGuard<'static, FontRegistry>, ReductionError> {
        let path = self.font_file()?;
        let mut fonts = FONTS
            .lock()
            .map_err(|_| ReductionError::Render("font registry poisoned".into()))?;
        if fonts.active.as_ref() == Some(&path) {
            return Ok(fonts);
        }

        let bytes = match fonts.loaded.get(&path) {
            Some(bytes) => *bytes,
            None => {
                let data = std::fs::read(&path).map_err(|e| {
                    ReductionError::Render(format!("cannot read font {}: {e}", path.display()))
                })?;
                let bytes: &'static [u8] = Box::leak(data.into_boxed_slice());
                fonts.loaded.insert(path.clone(), bytes);
                bytes
            }
        };
        register_font(FONT_FAMILY, FontStyle::Normal, bytes).map_err(|_| {
            ReductionError::Render(format!("{} is not a usable TrueType font", path.display()))
        })?;
        tracing::debug!(font = %path.display(), "registered plot font");
        fonts.active = Some(path);
        Ok(fonts)
    }
}

/// An explicit font must exist; otherwise the first existing candidate wins.
fn find_font(explicit: Option<PathBuf>, candidates: &[PathBuf]) -> Result<PathBuf, ReductionError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path);
        }
        return Err(ReductionError::Render(format!(
            "font file not found: {}",
            path.display()
        )));
    }
    candidates.iter().find(|p| p.is_file()).cloned().ok_or_else(|| {
        ReductionError::Render(format!(
            "no TrueType font found for titles and labels; pass --font or set {FONT_ENV}"
        ))
    })
}

impl PlotRenderer for PlottersRenderer {
    fn render(
        &self,
        points: &Array2<f64>,
        labels: &[String],
        title: &str,
        path: &Path,
    ) -> Result<(), ReductionError> {
        if points.ncols() != 2 {
            return Err(ReductionError::Render(format!(
                "expected 2 columns, got {}",
                points.ncols()
            )));
        }
        if points.nrows() != labels.len() {
            return Err(ReductionError::LabelMismatch {
                rows: points.nrows(),
                labels: labels.len(),
            });
        }
        let _font = self.activate_font()?;
        let (x_range, y_range) = axis_ranges(points);
        let dx = (x_range.end - x_range.start) * LABEL_OFFSET;
        let dy = (y_range.end - y_range.start) * LABEL_OFFSET;

        let root = BitMapBackend::new(path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE).map_err(render_error)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(40)
            .caption(title, (FONT_FAMILY, 48).into_font())
            .x_label_area_size(60)
            .y_label_area_size(90)
            .build_cartesian_2d(x_range, y_range)
            .map_err(render_error)?;
        chart
            .configure_mesh()
            .label_style((FONT_FAMILY, 24).into_font())
            .draw()
            .map_err(render_error)?;

        chart
            .draw_series(
                points
                    .rows()
                    .into_iter()
                    .enumerate()
                    .map(|(i, p)| Circle::new((p[0], p[1]), 8, Palette99::pick(i).filled())),
            )
            .map_err(render_error)?;
        chart
            .draw_series(points.rows().into_iter().zip(labels).map(|(p, label)| {
                Text::new(
                    label.clone(),
                    (p[0] + dx, p[1] + dy),
                    (FONT_FAMILY, 20).into_font(),
                )
            }))
            .map_err(render_error)?;

        root.present().map_err(render_error)?;
        tracing::debug!(title, path = %path.display(), points = points.nrows(), "rendered plot");
        Ok(())
    }
}

fn render_error<E: std::fmt::Display>(e: E) -> ReductionError {
    ReductionError::Render(e.to_string())
}

/// Data bounds padded by 5% (or by 1 when all values coincide).
fn axis_ranges(points: &Array2<f64>) -> (Range<f64>, Range<f64>) {
    let padded = |column: usize| {
        let values = points.column(column);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !min.is_finite() || !max.is_finite() {
            return -1.0..1.0;
        }
        let pad = if max > min { (max - min) * 0.05 } else { 1.0 };
        (min - pad)..(max + pad)
    };
    (padded(0), padded(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn ranges_are_padded() {
        let points = array![[0.0, 5.0], [10.0, 5.0]];
        let (x, y) = axis_ranges(&points);
        assert_eq!(x, -0.5..10.5);
        assert_eq!(y, 4.0..6.0);
    }

    fn system_font() -> Option<PathBuf> {
        FONT_CANDIDATES.iter().map(PathBuf::from).find(|p| p.is_file())
    }

    #[test]
    fn writes_a_png() {
        // Needs a system font to draw labels.
        let Some(font) = system_font() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pca.png");
        let points = array![[0.0, 0.0], [1.0, 2.0], [2.0, 1.0]];
        let labels: Vec<String> = ["Paper1: A", "Paper1: B", "Paper2: A"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let renderer = PlottersRenderer {
            width: 400,
            height: 300,
            font_path: Some(font),
        };
        renderer.render(&points, &labels, "PCA", &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn mismatched_labels_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let points = array![[0.0, 0.0], [1.0, 1.0]];
        let err = PlottersRenderer::default().render(
            &points,
            &["only one".to_string()],
            "PCA",
            &dir.path().join("x.png"),
        );
        assert!(matches!(err, Err(ReductionError::LabelMismatch { .. })));
    }

    #[test]
    fn missing_font_fails_without_writing_a_plot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("umap.png");
        let renderer = PlottersRenderer {
            font_path: Some(dir.path().join("no-such-font.ttf")),
            ..PlottersRenderer::default()
        };
        let points = array![[0.0, 0.0], [1.0, 1.0]];
        let labels = vec!["Paper1: A".to_string(), "Paper1: B".to_string()];

        match renderer.render(&points, &labels, "UMAP", &path) {
            Err(ReductionError::Render(message)) => {
                assert!(message.contains("no-such-font.ttf"))
            }
            other => panic!("expected a render error, got {other:?}"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn no_candidate_font_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let absent = vec![dir.path().join("a.ttf"), dir.path().join("b.ttf")];
        match find_font(None, &absent) {
            Err(ReductionError::Render(message)) => assert!(message.contains(FONT_ENV)),
            other => panic!("expected a render error, got {other:?}"),
        }

        let present = dir.path().join("b.ttf");
        std::fs::write(&present, b"font").unwrap();
        assert_eq!(find_font(None, &absent).unwrap(), present);
    }

    #[test]
    fn unusable_font_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.ttf");
        std::fs::write(&bogus, b"definitely not a font").unwrap();
        let renderer = PlottersRenderer {
            font_path: Some(bogus),
            ..PlottersRenderer::default()
        };
        let points = array![[0.0, 0.0], [1.0, 1.0]];
        let labels = vec!["a".to_string(), "b".to_string()];
        let err = renderer.render(&points, &labels, "PCA", &dir.path().join("pca.png"));
        assert!(matches!(err, Err(ReductionError::Render(_))));
    }
}
