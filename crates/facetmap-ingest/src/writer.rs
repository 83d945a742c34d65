//! On-disk layout of split papers.

use std::path::{Path, PathBuf};

use facetmap_core::Segment;
use facetmap_core::corpus::{SECTION_MARKER, SECTIONS_DIR_SUFFIX};

use crate::IngestError;

/// `{paper}_section_{id}.txt`, with `.` in the id replaced by `_`.
pub fn section_file_name(paper: &str, identifier: &str) -> String {
    format!(
        "{}{}{}.txt",
        paper,
        SECTION_MARKER,
        identifier.replace('.', "_")
    )
}

/// Write each segment to `{out_root}/{paper}_sections/`. Returns the folder.
///
/// Existing files with the same names are overwritten; other files in the
/// folder are left alone.
pub fn write_sections(
    out_root: &Path,
    paper: &str,
    segments: &[Segment],
) -> Result<PathBuf, IngestError> {
    let dir = out_root.join(format!("{paper}{SECTIONS_DIR_SUFFIX}"));
    std::fs::create_dir_all(&dir).map_err(|e| IngestError::io(&dir, e))?;

    for segment in segments {
        let path = dir.join(section_file_name(paper, &segment.identifier));
        std::fs::write(&path, segment.text()).map_err(|e| IngestError::io(&path, e))?;
        tracing::debug!(file = %path.display(), "wrote section");
    }
    Ok(dir)
}

/// Save the raw TEI as `{out_root}/{paper}_document.xml`.
pub fn save_tei(out_root: &Path, paper: &str, tei: &str) -> Result<PathBuf, IngestError> {
    std::fs::create_dir_all(out_root).map_err(|e| IngestError::io(out_root, e))?;
    let path = out_root.join(format!("{paper}_document.xml"));
    std::fs::write(&path, tei).map_err(|e| IngestError::io(&path, e))?;
    Ok(path)
}
