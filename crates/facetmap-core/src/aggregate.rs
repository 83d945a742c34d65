//! Drives load -> select -> extract -> embed for every paper and stacks the
//! facet vectors into one labeled matrix.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use thiserror::Error;

use crate::budget::select_within_budget;
use crate::cache::{self, CacheError};
use crate::corpus::{self, CorpusError};
use crate::embed::{EmbeddingError, EmbeddingProducer};
use crate::extract::{ExtractionError, FacetExtractor};
use crate::provider::{CompletionProvider, EmbeddingProvider};
use crate::tokenizer::TokenCounter;
use crate::{Config, facet_label, paper_label};

#[derive(Error, Debug)]
pub enum PaperError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error("zero sections kept ({sections} offered, first exceeds the token budget)")]
    BudgetExhausted { sections: usize },
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("embedding dimension {got} differs from earlier papers ({expected})")]
    DimensionMismatch { expected: usize, got: usize },
}

/// How much of a paper went into the extraction prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionsKept {
    pub kept: usize,
    pub total: usize,
    /// Token count of the concatenated prompt text.
    pub tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaperStatus {
    Succeeded {
        rows: usize,
        /// `None` when the vectors were read back from the cache.
        sections: Option<SectionsKept>,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperReport {
    pub paper_id: usize,
    pub label: String,
    pub folder: PathBuf,
    pub status: PaperStatus,
}

impl PaperReport {
    pub fn is_success(&self) -> bool {
        matches!(self.status, PaperStatus::Succeeded { .. })
    }
}

/// Progress notifications emitted while aggregating.
#[derive(Debug, Clone)]
pub enum AggregateEvent {
    PaperStarted {
        paper_id: usize,
        folder: PathBuf,
    },
    SectionsSelected {
        paper_id: usize,
        sections: SectionsKept,
    },
    PaperFinished(PaperReport),
}

/// The stacked facet vectors of every successful paper.
#[derive(Debug, Clone)]
pub struct Aggregate {
    /// One row per (paper, facet), paper-major.
    pub matrix: Array2<f64>,
    /// `labels[i]` names `matrix.row(i)`.
    pub labels: Vec<String>,
    pub papers: Vec<PaperReport>,
}

impl Aggregate {
    pub fn succeeded(&self) -> impl Iterator<Item = &PaperReport> {
        self.papers.iter().filter(|p| p.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &PaperReport> {
        self.papers.iter().filter(|p| !p.is_success())
    }

    pub fn dimension(&self) -> usize {
        self.matrix.ncols()
    }
}

struct PaperRows {
    vectors: Array2<f64>,
    sections: Option<SectionsKept>,
}

pub struct Aggregator {
    config: Config,
    extractor: FacetExtractor,
    producer: EmbeddingProducer,
    counter: Arc<dyn TokenCounter>,
    cache_dir: Option<PathBuf>,
    reuse_cache: bool,
}

impl Aggregator {
    pub fn new(
        config: Config,
        completion: Arc<dyn CompletionProvider>,
        embedding: Arc<dyn EmbeddingProvider>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        let extractor =
            FacetExtractor::new(completion, config.facets.clone(), config.system_prompt.clone());
        Self {
            extractor,
            producer: EmbeddingProducer::new(embedding),
            counter,
            cache_dir: None,
            reuse_cache: false,
            config,
        }
    }

    /// Persist each paper's vectors under `dir` as they are produced.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Read a paper from the cache instead of calling the models when its
    /// cached facet names match the configured facet set.
    pub fn reuse_cache(mut self, reuse: bool) -> Self {
        self.reuse_cache = reuse;
        self
    }

    /// Process `folders` in sorted order, numbering papers 1..=K.
    ///
    /// A failing paper is reported and skipped; it keeps its number so the
    /// labels of later papers do not shift.
    pub async fn aggregate<F>(&self, folders: &[PathBuf], progress: F) -> Aggregate
    where
        F: Fn(AggregateEvent),
    {
        let mut folders = folders.to_vec();
        folders.sort();

        let mut rows: Vec<f64> = Vec::new();
        let mut labels: Vec<String> = Vec::new();
        let mut dimension: Option<usize> = None;
        let mut papers = Vec::with_capacity(folders.len());

        for (index, folder) in folders.iter().enumerate() {
            let paper_id = index + 1;
            progress(AggregateEvent::PaperStarted {
                paper_id,
                folder: folder.clone(),
            });
            tracing::info!(paper = paper_id, folder = %folder.display(), "processing paper");

            let outcome = self
                .process_paper(paper_id, folder, &progress)
                .await
                .and_then(|paper| match dimension {
                    Some(expected) if expected != paper.vectors.ncols() => {
                        Err(PaperError::DimensionMismatch {
                            expected,
                            got: paper.vectors.ncols(),
                        })
                    }
                    _ => Ok(paper),
                });

            let status = match outcome {
                Ok(paper) => {
                    dimension = Some(paper.vectors.ncols());
                    rows.extend(paper.vectors.iter().copied());
                    labels.extend(
                        self.config
                            .facets
                            .iter()
                            .map(|facet| facet_label(paper_id, facet)),
                    );
                    PaperStatus::Succeeded {
                        rows: paper.vectors.nrows(),
                        sections: paper.sections,
                    }
                }
                Err(e) => {
                    tracing::warn!(paper = paper_id, folder = %folder.display(), error = %e, "paper failed");
                    PaperStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            let report = PaperReport {
                paper_id,
                label: paper_label(paper_id),
                folder: folder.clone(),
                status,
            };
            progress(AggregateEvent::PaperFinished(report.clone()));
            papers.push(report);
        }

        if let Some(dir) = &self.cache_dir {
            let keep: Vec<usize> = papers
                .iter()
                .filter(|p| p.is_success())
                .map(|p| p.paper_id)
                .collect();
            match cache::retain_papers(dir, &keep) {
                Ok(removed) if !removed.is_empty() => {
                    tracing::info!(?removed, "dropped cache entries of papers without fresh rows");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "could not prune embedding cache"),
            }
        }

        let d = dimension.unwrap_or(0);
        let matrix = Array2::from_shape_vec((labels.len(), d), rows)
            .unwrap_or_else(|_| Array2::zeros((0, d)));
        Aggregate {
            matrix,
            labels,
            papers,
        }
    }

    async fn process_paper<F>(
        &self,
        paper_id: usize,
        folder: &Path,
        progress: &F,
    ) -> Result<PaperRows, PaperError>
    where
        F: Fn(AggregateEvent),
    {
        if let Some(cached) = self.cached_rows(paper_id)? {
            tracing::info!(paper = paper_id, "reusing cached embeddings");
            return Ok(cached);
        }

        let paper = corpus::load_paper(paper_id, folder, self.config.section_order)?;
        let texts: Vec<String> = paper.segments.iter().map(|s| s.text()).collect();
        let selection = select_within_budget(&texts, self.counter.as_ref(), self.config.token_budget);
        if selection.is_exhausted() {
            return Err(PaperError::BudgetExhausted {
                sections: selection.offered,
            });
        }

        let full_text = corpus::concatenate_segments(selection.kept);
        let sections = SectionsKept {
            kept: selection.kept.len(),
            total: selection.offered,
            tokens: self.counter.count_tokens(&full_text),
        };
        tracing::info!(
            paper = paper_id,
            kept = sections.kept,
            total = sections.total,
            tokens = sections.tokens,
            "selected sections"
        );
        progress(AggregateEvent::SectionsSelected { paper_id, sections });

        let facets = self.extractor.extract(&full_text).await?;
        let vectors = self.producer.embed(&facets.texts()).await?;
        let vectors = to_matrix(&vectors)?;

        if let Some(dir) = &self.cache_dir {
            cache::save_paper_embeddings(dir, paper_id, &vectors, self.config.facets.names())?;
        }

        Ok(PaperRows {
            vectors,
            sections: Some(sections),
        })
    }

    fn cached_rows(&self, paper_id: usize) -> Result<Option<PaperRows>, PaperError> {
        let Some(dir) = self.cache_dir.as_deref().filter(|_| self.reuse_cache) else {
            return Ok(None);
        };
        match cache::load_paper_embeddings(dir, paper_id)? {
            Some(cached) if cached.facets == self.config.facets.names() => Ok(Some(PaperRows {
                vectors: cached.vectors,
                sections: None,
            })),
            Some(_) => {
                tracing::info!(paper = paper_id, "cached facets differ from configuration, recomputing");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// Widen provider f32 vectors into a float64 row matrix.
fn to_matrix(vectors: &[Vec<f32>]) -> Result<Array2<f64>, EmbeddingError> {
    let d = vectors.first().map(Vec::len).unwrap_or(0);
    let flat: Vec<f64> = vectors.iter().flatten().map(|&x| x as f64).collect();
    Array2::from_shape_vec((vectors.len(), d), flat).map_err(|_| EmbeddingError::CountMismatch {
        expected: vectors.len() * d,
        got: vectors.iter().map(Vec::len).sum(),
    })
}
