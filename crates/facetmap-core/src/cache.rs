//! Per-paper embedding cache: `Paper{n}/Paper{n}_facets_emb.npy` holding the
//! facet vectors as float64 rows, next to `Paper{n}_facets_labels.json` holding
//! the facet names in row order.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use ndarray::{Array2, Axis, concatenate};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use thiserror::Error;

use crate::{facet_label, paper_label};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {message}")]
    NpyWrite { path: PathBuf, message: String },
    #[error("failed to read {path}: {message}")]
    NpyRead { path: PathBuf, message: String },
    #[error("invalid labels file {path}: {source}")]
    Labels {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: {rows} rows but {labels} labels")]
    RowLabelMismatch {
        path: PathBuf,
        rows: usize,
        labels: usize,
    },
    #[error("{label} has dimension {got}, earlier papers have {expected}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        got: usize,
    },
    #[error("no cached papers under {0}")]
    Empty(PathBuf),
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File locations for one paper's cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    pub dir: PathBuf,
    pub vectors: PathBuf,
    pub labels: PathBuf,
}

impl CachePaths {
    pub fn for_paper(embeddings_dir: &Path, paper_id: usize) -> Self {
        let prefix = paper_label(paper_id);
        let dir = embeddings_dir.join(&prefix);
        Self {
            vectors: dir.join(format!("{}_facets_emb.npy", prefix)),
            labels: dir.join(format!("{}_facets_labels.json", prefix)),
            dir,
        }
    }
}

/// One paper's cached rows.
#[derive(Debug, Clone)]
pub struct CachedPaper {
    pub paper_id: usize,
    pub facets: Vec<String>,
    pub vectors: Array2<f64>,
}

pub fn save_paper_embeddings(
    embeddings_dir: &Path,
    paper_id: usize,
    vectors: &Array2<f64>,
    facets: &[String],
) -> Result<CachePaths, CacheError> {
    if vectors.nrows() != facets.len() {
        return Err(CacheError::RowLabelMismatch {
            path: embeddings_dir.to_path_buf(),
            rows: vectors.nrows(),
            labels: facets.len(),
        });
    }
    let paths = CachePaths::for_paper(embeddings_dir, paper_id);
    std::fs::create_dir_all(&paths.dir).map_err(|e| CacheError::io(&paths.dir, e))?;

    let file = File::create(&paths.vectors).map_err(|e| CacheError::io(&paths.vectors, e))?;
    vectors
        .write_npy(BufWriter::new(file))
        .map_err(|e| CacheError::NpyWrite {
            path: paths.vectors.clone(),
            message: e.to_string(),
        })?;

    let json = serde_json::to_string_pretty(facets).map_err(|source| CacheError::Labels {
        path: paths.labels.clone(),
        source,
    })?;
    std::fs::write(&paths.labels, json).map_err(|e| CacheError::io(&paths.labels, e))?;

    tracing::debug!(
        paper = paper_id,
        rows = vectors.nrows(),
        path = %paths.vectors.display(),
        "cached facet embeddings"
    );
    Ok(paths)
}

/// Read one paper's entry. `Ok(None)` when either file is absent.
pub fn load_paper_embeddings(
    embeddings_dir: &Path,
    paper_id: usize,
) -> Result<Option<CachedPaper>, CacheError> {
    let paths = CachePaths::for_paper(embeddings_dir, paper_id);
    if !paths.vectors.is_file() || !paths.labels.is_file() {
        return Ok(None);
    }

    let file = File::open(&paths.vectors).map_err(|e| CacheError::io(&paths.vectors, e))?;
    let vectors =
        Array2::<f64>::read_npy(BufReader::new(file)).map_err(|e| CacheError::NpyRead {
            path: paths.vectors.clone(),
            message: e.to_string(),
        })?;

    let raw = std::fs::read_to_string(&paths.labels).map_err(|e| CacheError::io(&paths.labels, e))?;
    let facets: Vec<String> = serde_json::from_str(&raw).map_err(|source| CacheError::Labels {
        path: paths.labels.clone(),
        source,
    })?;

    if vectors.nrows() != facets.len() {
        return Err(CacheError::RowLabelMismatch {
            path: paths.vectors,
            rows: vectors.nrows(),
            labels: facets.len(),
        });
    }

    Ok(Some(CachedPaper {
        paper_id,
        facets,
        vectors,
    }))
}

/// Paper ids with a `Paper{n}` directory under `embeddings_dir`, ascending.
pub fn cached_paper_ids(embeddings_dir: &Path) -> Result<Vec<usize>, CacheError> {
    let entries = std::fs::read_dir(embeddings_dir).map_err(|e| CacheError::io(embeddings_dir, e))?;
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CacheError::io(embeddings_dir, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(id) = name.strip_prefix("Paper").and_then(|n| n.parse::<usize>().ok()) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Delete every `Paper{n}` entry whose id is not in `keep`, so the cache only
/// holds papers that succeeded in the last run. Returns the removed ids.
pub fn retain_papers(embeddings_dir: &Path, keep: &[usize]) -> Result<Vec<usize>, CacheError> {
    if !embeddings_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut removed = Vec::new();
    for id in cached_paper_ids(embeddings_dir)? {
        if keep.contains(&id) {
            continue;
        }
        let dir = CachePaths::for_paper(embeddings_dir, id).dir;
        std::fs::remove_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        removed.push(id);
    }
    Ok(removed)
}

/// Rebuild the aggregate matrix and `Paper{n}: {facet}` labels from the cache.
///
/// Papers are stacked in id order; directories without both files are skipped.
pub fn load_all(embeddings_dir: &Path) -> Result<(Array2<f64>, Vec<String>), CacheError> {
    let mut blocks: Vec<Array2<f64>> = Vec::new();
    let mut labels = Vec::new();
    let mut dimension: Option<usize> = None;

    for id in cached_paper_ids(embeddings_dir)? {
        let Some(paper) = load_paper_embeddings(embeddings_dir, id)? else {
            tracing::warn!(paper = id, "incomplete cache entry, skipping");
            continue;
        };
        let d = paper.vectors.ncols();
        match dimension {
            Some(expected) if expected != d => {
                return Err(CacheError::DimensionMismatch {
                    label: paper_label(id),
                    expected,
                    got: d,
                });
            }
            _ => dimension = Some(d),
        }
        labels.extend(paper.facets.iter().map(|f| facet_label(id, f)));
        blocks.push(paper.vectors);
    }

    if blocks.is_empty() {
        return Err(CacheError::Empty(embeddings_dir.to_path_buf()));
    }
    let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
    let matrix = concatenate(Axis(0), &views).map_err(|e| CacheError::NpyRead {
        path: embeddings_dir.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok((matrix, labels))
}
