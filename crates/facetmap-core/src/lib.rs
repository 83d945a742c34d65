use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
pub mod budget;
pub mod cache;
pub mod config_file;
pub mod corpus;
pub mod embed;
pub mod extract;
pub mod provider;
pub mod tokenizer;

// Re-export for convenience
pub use aggregate::{
    Aggregate, AggregateEvent, Aggregator, PaperError, PaperReport, PaperStatus, SectionsKept,
};
pub use budget::{BudgetSelection, select_within_budget};
pub use cache::CacheError;
pub use config_file::ConfigFile;
pub use corpus::{SectionOrder, concatenate_segments, discover_paper_folders, load_paper};
pub use embed::{EmbeddingError, EmbeddingProducer};
pub use extract::{ExtractionError, ExtractionErrorKind, FacetExtractor, FacetTexts};
pub use provider::{CompletionProvider, EmbeddingProvider, ProviderError};
pub use tokenizer::{TiktokenCounter, TokenCounter};

/// Default facets, in the order they are embedded and labeled.
pub const DEFAULT_FACETS: [&str; 5] = [
    "Problem Description and RQ",
    "Proposed Design and Solution",
    "Evaluation Method",
    "Contribution and Impact",
    "Limitation and Future Work",
];

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an academic-paper extractor.";

/// Token budget applied to the concatenated sections sent for extraction.
pub const DEFAULT_TOKEN_BUDGET: usize = 8000;

pub const DEFAULT_SEED: u64 = 42;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-12-01-preview";

/// One section of a paper's extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Section number from the source markup, or the 1-based position when absent.
    pub identifier: String,
    pub title: String,
    pub body: String,
}

impl Segment {
    /// The segment as it is stored on disk and sent to the model:
    /// title, a blank line, then the body.
    pub fn text(&self) -> String {
        match (self.title.is_empty(), self.body.is_empty()) {
            (_, true) => self.title.clone(),
            (true, false) => self.body.clone(),
            (false, false) => format!("{}\n\n{}", self.title, self.body),
        }
    }

    /// Rebuild a segment from its stored text. The first paragraph is the title.
    pub fn from_text(identifier: impl Into<String>, text: &str) -> Self {
        let text = text.trim();
        let (title, body) = match text.split_once("\n\n") {
            Some((title, body)) => (title.to_string(), body.to_string()),
            None => (text.to_string(), String::new()),
        };
        Self {
            identifier: identifier.into(),
            title,
            body,
        }
    }
}

/// A paper: its ordered sections plus a 1-based id assigned from folder order.
#[derive(Debug, Clone)]
pub struct Paper {
    pub paper_id: usize,
    pub source: std::path::PathBuf,
    pub segments: Vec<Segment>,
}

impl Paper {
    /// `Paper{n}`, the prefix used in plot labels and cache file names.
    pub fn label(&self) -> String {
        paper_label(self.paper_id)
    }
}

pub fn paper_label(paper_id: usize) -> String {
    format!("Paper{}", paper_id)
}

/// Plot label for one (paper, facet) row of the aggregate matrix.
pub fn facet_label(paper_id: usize, facet: &str) -> String {
    format!("{}: {}", paper_label(paper_id), facet)
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("facet set must not be empty")]
    EmptyFacets,
    #[error("duplicate facet name: {0:?}")]
    DuplicateFacet(String),
    #[error("unknown provider flavor {0:?} (expected \"openai\" or \"azure\")")]
    UnknownFlavor(String),
    #[error("unknown section order {0:?} (expected \"lexical\" or \"numeric\")")]
    UnknownSectionOrder(String),
}

/// The ordered facet names extracted from every paper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetSet(Vec<String>);

impl FacetSet {
    pub fn new<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut facets: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if facets.contains(&name) {
                return Err(ConfigError::DuplicateFacet(name));
            }
            facets.push(name);
        }
        if facets.is_empty() {
            return Err(ConfigError::EmptyFacets);
        }
        Ok(Self(facets))
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl Default for FacetSet {
    fn default() -> Self {
        Self(DEFAULT_FACETS.iter().map(|f| f.to_string()).collect())
    }
}

/// Which wire dialect the model endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFlavor {
    /// `Authorization: Bearer`, `{endpoint}/embeddings`.
    #[default]
    OpenAi,
    /// `api-key` header, `{endpoint}/openai/deployments/{model}/...?api-version=`.
    Azure,
}

impl FromStr for ApiFlavor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ApiFlavor::OpenAi),
            "azure" => Ok(ApiFlavor::Azure),
            other => Err(ConfigError::UnknownFlavor(other.to_string())),
        }
    }
}

/// Pipeline configuration, passed explicitly to every component.
#[derive(Clone)]
pub struct Config {
    pub api_flavor: ApiFlavor,
    pub api_endpoint: String,
    pub api_key: Option<String>,
    /// Only used by the Azure flavor.
    pub api_version: String,
    pub embedding_model: String,
    pub completion_model: String,
    /// Retries on 429 / 5xx / connect errors. Zero disables retrying.
    pub max_retries: u32,
    /// `None` leaves the transport default in place.
    pub request_timeout_secs: Option<u64>,
    pub token_budget: usize,
    pub system_prompt: String,
    pub facets: FacetSet,
    pub section_order: SectionOrder,
    /// Seed shared by the randomized projections.
    pub seed: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_flavor", &self.api_flavor)
            .field("api_endpoint", &self.api_endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_version", &self.api_version)
            .field("embedding_model", &self.embedding_model)
            .field("completion_model", &self.completion_model)
            .field("max_retries", &self.max_retries)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("token_budget", &self.token_budget)
            .field("system_prompt", &self.system_prompt)
            .field("facets", &self.facets)
            .field("section_order", &self.section_order)
            .field("seed", &self.seed)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_flavor: ApiFlavor::OpenAi,
            api_endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            completion_model: DEFAULT_COMPLETION_MODEL.to_string(),
            max_retries: 0,
            request_timeout_secs: None,
            token_budget: DEFAULT_TOKEN_BUDGET,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            facets: FacetSet::default(),
            section_order: SectionOrder::Lexical,
            seed: DEFAULT_SEED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_text_round_trips() {
        let seg = Segment {
            identifier: "2.1".into(),
            title: "Threat Model".into(),
            body: "We assume...\n\nThe attacker...".into(),
        };
        let back = Segment::from_text("2.1", &seg.text());
        assert_eq!(back, seg);
    }

    #[test]
    fn segment_without_body_is_title_only() {
        let seg = Segment::from_text("1", "  Introduction \n");
        assert_eq!(seg.title, "Introduction");
        assert!(seg.body.is_empty());
        assert_eq!(seg.text(), "Introduction");
    }

    #[test]
    fn facet_labels_use_paper_prefix() {
        assert_eq!(facet_label(3, "Evaluation Method"), "Paper3: Evaluation Method");
    }

    #[test]
    fn facet_set_rejects_duplicates_and_empty() {
        assert!(matches!(
            FacetSet::new(["A", "B", "A"]),
            Err(ConfigError::DuplicateFacet(name)) if name == "A"
        ));
        assert!(matches!(
            FacetSet::new(Vec::<String>::new()),
            Err(ConfigError::EmptyFacets)
        ));
    }

    #[test]
    fn default_facet_set_has_five_entries() {
        let facets = FacetSet::default();
        assert_eq!(facets.len(), 5);
        assert_eq!(facets.names()[0], "Problem Description and RQ");
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = Config {
            api_key: Some("sk-secret".into()),
            ..Config::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn flavor_parses_case_insensitively() {
        assert_eq!("Azure".parse::<ApiFlavor>().unwrap(), ApiFlavor::Azure);
        assert!("bedrock".parse::<ApiFlavor>().is_err());
    }
}
