//! Loading a paper's per-section text files from disk.
//!
//! Section files follow `{paper}_sections/{paper}_section_{id}.txt`, where the
//! id is the TEI section number with dots replaced by underscores. Section ids
//! are not zero-padded, so the order files are read in is a policy choice:
//! see [`SectionOrder`].

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ConfigError, Paper, Segment};

/// Marker between the paper name and the section id in a section file name.
pub const SECTION_MARKER: &str = "_section_";

/// Suffix identifying a per-paper sections folder.
pub const SECTIONS_DIR_SUFFIX: &str = "_sections";

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}

impl CorpusError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CorpusError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// How section files are ordered within a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionOrder {
    /// Plain file name order: `section_10` sorts before `section_2`.
    #[default]
    Lexical,
    /// Section ids compared component-wise as integers (`2` < `2_1` < `10`).
    Numeric,
}

impl FromStr for SectionOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lexical" => Ok(SectionOrder::Lexical),
            "numeric" => Ok(SectionOrder::Numeric),
            other => Err(ConfigError::UnknownSectionOrder(other.to_string())),
        }
    }
}

impl SectionOrder {
    /// Compare two section file names under this policy.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            SectionOrder::Lexical => a.cmp(b),
            SectionOrder::Numeric => {
                let ka = numeric_key(section_id_from_file_name(a));
                let kb = numeric_key(section_id_from_file_name(b));
                ka.cmp(&kb).then_with(|| a.cmp(b))
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum IdPart {
    Num(u64),
    Text(String),
}

fn numeric_key(id: &str) -> Vec<IdPart> {
    id.split(['_', '.'])
        .filter(|p| !p.is_empty())
        .map(|p| match p.parse::<u64>() {
            Ok(n) => IdPart::Num(n),
            Err(_) => IdPart::Text(p.to_string()),
        })
        .collect()
}

/// Extract the section id from a file name such as `paper-1_section_3_2.txt`.
///
/// Falls back to the file stem when the name does not contain the marker.
pub fn section_id_from_file_name(file_name: &str) -> &str {
    let stem = file_name.strip_suffix(".txt").unwrap_or(file_name);
    match stem.rfind(SECTION_MARKER) {
        Some(pos) => &stem[pos + SECTION_MARKER.len()..],
        None => stem,
    }
}

/// List the `*.txt` files of a sections folder in the configured order.
pub fn list_section_files(folder: &Path, order: SectionOrder) -> Result<Vec<PathBuf>, CorpusError> {
    if !folder.is_dir() {
        return Err(CorpusError::NotADirectory(folder.to_path_buf()));
    }
    let entries = std::fs::read_dir(folder).map_err(|e| CorpusError::io(folder, e))?;

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CorpusError::io(folder, e))?;
        let path = entry.path();
        let is_txt = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("txt"))
            .unwrap_or(false);
        if !is_txt || !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push((name, path));
    }

    files.sort_by(|(a, _), (b, _)| order.compare(a, b));
    Ok(files.into_iter().map(|(_, p)| p).collect())
}

/// Read every section of one paper, in the configured order.
pub fn load_segments(folder: &Path, order: SectionOrder) -> Result<Vec<Segment>, CorpusError> {
    let files = list_section_files(folder, order)?;
    let mut segments = Vec::with_capacity(files.len());
    for path in files {
        let text = std::fs::read_to_string(&path).map_err(|e| CorpusError::io(&path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = section_id_from_file_name(&name).replace('_', ".");
        segments.push(Segment::from_text(id, &text));
    }
    Ok(segments)
}

pub fn load_paper(paper_id: usize, folder: &Path, order: SectionOrder) -> Result<Paper, CorpusError> {
    Ok(Paper {
        paper_id,
        source: folder.to_path_buf(),
        segments: load_segments(folder, order)?,
    })
}

/// Find every `*_sections` directory directly under `root`, sorted by path.
///
/// The position in this list is the paper's 1-based id.
pub fn discover_paper_folders(root: &Path) -> Result<Vec<PathBuf>, CorpusError> {
    if !root.is_dir() {
        return Err(CorpusError::NotADirectory(root.to_path_buf()));
    }
    let entries = std::fs::read_dir(root).map_err(|e| CorpusError::io(root, e))?;
    let mut folders = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CorpusError::io(root, e))?;
        let path = entry.path();
        let is_sections = entry
            .file_name()
            .to_string_lossy()
            .ends_with(SECTIONS_DIR_SUFFIX);
        if is_sections && path.is_dir() {
            folders.push(path);
        }
    }
    folders.sort();
    Ok(folders)
}

/// Join segment texts with a blank line, the form sent to the model.
pub fn concatenate_segments<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join("\n\n")
}
