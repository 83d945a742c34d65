//! Turn PDFs into the per-section text folders the pipeline reads.
//!
//! A PDF goes to GROBID ([`grobid`]), the returned TEI is split on its
//! section headings ([`tei`]) and each section is written to
//! `{out}/{paper}_sections/{paper}_section_{id}.txt` ([`writer`]).

use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod grobid;
pub mod tei;
pub mod writer;

pub use facetmap_core::Segment;
pub use grobid::GrobidClient;
pub use tei::parse_tei;
pub use writer::{save_tei, section_file_name, write_sections};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("TEI document has no <text><body> element")]
    NoBody,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("GROBID returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot derive a paper name from {0}")]
    PaperName(PathBuf),
}

impl IngestError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What [`split_pdf`] produced for one paper.
#[derive(Debug, Clone)]
pub struct SplitReport {
    pub paper: String,
    pub sections_dir: PathBuf,
    pub tei_path: PathBuf,
    pub sections: usize,
}

/// The paper name used in output file names: the PDF's file stem.
pub fn paper_name(pdf: &Path) -> Result<String, IngestError> {
    pdf.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| IngestError::PaperName(pdf.to_path_buf()))
}

/// Run one PDF through GROBID and write its sections under `out_root`.
///
/// The raw TEI is saved before splitting, so a document whose body cannot be
/// found still leaves `{paper}_document.xml` behind for inspection.
pub async fn split_pdf(
    client: &GrobidClient,
    pdf: &Path,
    out_root: &Path,
) -> Result<SplitReport, IngestError> {
    let paper = paper_name(pdf)?;
    let tei = client.process_fulltext(pdf).await?;
    let tei_path = save_tei(out_root, &paper, &tei)?;
    let segments = parse_tei(tei.as_bytes())?;
    let sections_dir = write_sections(out_root, &paper, &segments)?;
    tracing::info!(
        paper = %paper,
        sections = segments.len(),
        dir = %sections_dir.display(),
        "paper split"
    );
    Ok(SplitReport {
        paper,
        sections_dir,
        tei_path,
        sections: segments.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_name_is_the_file_stem() {
        assert_eq!(paper_name(Path::new("/in/paper-1.pdf")).unwrap(), "paper-1");
        assert_eq!(paper_name(Path::new("notes")).unwrap(), "notes");
        assert!(matches!(
            paper_name(Path::new("/")),
            Err(IngestError::PaperName(_))
        ));
    }
}
