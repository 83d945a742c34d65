//! Facet extraction: prompt construction and recovery of a JSON object from a
//! free-form model reply.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::FacetSet;
use crate::provider::{CompletionProvider, ProviderError};

/// Coarse classification of an [`ExtractionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    NoJsonFound,
    MalformedJson,
    MissingFacet,
    NonTextFacet,
    Transport,
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("no JSON object found in completion response")]
    NoJsonFound { raw: String },
    #[error("JSON parse error: {source}")]
    MalformedJson {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("facet {facet:?} missing from completion response")]
    MissingFacet { facet: String, raw: String },
    #[error("facet {facet:?} is not a string")]
    NonTextFacet { facet: String, raw: String },
    #[error("completion request failed: {0}")]
    Completion(#[from] ProviderError),
}

impl ExtractionError {
    pub fn kind(&self) -> ExtractionErrorKind {
        match self {
            ExtractionError::NoJsonFound { .. } => ExtractionErrorKind::NoJsonFound,
            ExtractionError::MalformedJson { .. } => ExtractionErrorKind::MalformedJson,
            ExtractionError::MissingFacet { .. } => ExtractionErrorKind::MissingFacet,
            ExtractionError::NonTextFacet { .. } => ExtractionErrorKind::NonTextFacet,
            ExtractionError::Completion(_) => ExtractionErrorKind::Transport,
        }
    }

    /// The model output (or the JSON candidate cut from it) behind the failure.
    pub fn raw(&self) -> Option<&str> {
        match self {
            ExtractionError::NoJsonFound { raw }
            | ExtractionError::MalformedJson { raw, .. }
            | ExtractionError::MissingFacet { raw, .. }
            | ExtractionError::NonTextFacet { raw, .. } => Some(raw),
            ExtractionError::Completion(_) => None,
        }
    }
}

/// Facet summaries in facet-set order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetTexts(Vec<(String, String)>);

impl FacetTexts {
    pub fn get(&self, facet: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == facet)
            .map(|(_, text)| text.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    /// The summaries alone, ready to be embedded.
    pub fn texts(&self) -> Vec<String> {
        self.0.iter().map(|(_, text)| text.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, t)| (n.as_str(), t.as_str()))
    }
}

/// The user message: the JSON-only instruction followed by the paper text.
pub fn build_instruction(facets: &FacetSet, full_text: &str) -> String {
    let keys = serde_json::to_string(facets.names()).unwrap_or_default();
    format!(
        "You will be given the full text of one paper.  \
         Respond *only* with a JSON object whose keys are exactly {} \
         and values are one-paragraph summaries.\n\n{}",
        keys, full_text
    )
}

/// Cut the brace-delimited span (first `{` to last `}`) out of a reply.
pub fn find_json_object(raw: &str) -> Option<&str> {
    static OBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());
    OBJECT_RE.find(raw).map(|m| m.as_str())
}

/// Parse a model reply into facet summaries.
///
/// Commentary around the JSON object is tolerated. Keys outside `facets` are
/// dropped, so on success the key set is exactly the requested one.
pub fn parse_facet_response(raw: &str, facets: &FacetSet) -> Result<FacetTexts, ExtractionError> {
    let raw = raw.trim();
    let candidate = find_json_object(raw).ok_or_else(|| ExtractionError::NoJsonFound {
        raw: raw.to_string(),
    })?;

    let mut object: Map<String, Value> =
        serde_json::from_str(candidate).map_err(|source| ExtractionError::MalformedJson {
            raw: candidate.to_string(),
            source,
        })?;

    let mut out = Vec::with_capacity(facets.len());
    for facet in facets.iter() {
        match object.remove(facet) {
            Some(Value::String(text)) => out.push((facet.clone(), text)),
            Some(_) => {
                return Err(ExtractionError::NonTextFacet {
                    facet: facet.clone(),
                    raw: candidate.to_string(),
                });
            }
            None => {
                return Err(ExtractionError::MissingFacet {
                    facet: facet.clone(),
                    raw: candidate.to_string(),
                });
            }
        }
    }

    if !object.is_empty() {
        let extra: Vec<&String> = object.keys().collect();
        tracing::debug!(?extra, "ignoring keys outside the facet set");
    }

    Ok(FacetTexts(out))
}

/// Asks a completion model for every facet of one paper in a single call.
pub struct FacetExtractor {
    provider: Arc<dyn CompletionProvider>,
    facets: FacetSet,
    system_prompt: String,
}

impl FacetExtractor {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        facets: FacetSet,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            facets,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn facets(&self) -> &FacetSet {
        &self.facets
    }

    pub async fn extract(&self, full_text: &str) -> Result<FacetTexts, ExtractionError> {
        let user_prompt = build_instruction(&self.facets, full_text);
        let raw = self
            .provider
            .complete(&self.system_prompt, &user_prompt)
            .await?;
        parse_facet_response(&raw, &self.facets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{MockCompletion, MockReply};

    fn ab() -> FacetSet {
        FacetSet::new(["A", "B"]).unwrap()
    }

    #[test]
    fn json_wrapped_in_commentary_is_recovered() {
        let parsed = parse_facet_response(r#"Sure! {"A": "x", "B": "y"}"#, &ab()).unwrap();
        assert_eq!(parsed.get("A"), Some("x"));
        assert_eq!(parsed.get("B"), Some("y"));
        assert_eq!(parsed.names().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn no_brace_means_no_json() {
        let err = parse_facet_response("I cannot help with that.", &ab()).unwrap_err();
        assert_eq!(err.kind(), ExtractionErrorKind::NoJsonFound);
        assert_eq!(err.raw(), Some("I cannot help with that."));
    }

    #[test]
    fn missing_facet_is_fatal() {
        let err = parse_facet_response(r#"{"A": "x"}"#, &ab()).unwrap_err();
        match err {
            ExtractionError::MissingFacet { facet, raw } => {
                assert_eq!(facet, "B");
                assert_eq!(raw, r#"{"A": "x"}"#);
            }
            other => panic!("expected MissingFacet, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_keeps_the_candidate() {
        let err = parse_facet_response("Here: {\"A\": \"x\",, }", &ab()).unwrap_err();
        assert_eq!(err.kind(), ExtractionErrorKind::MalformedJson);
        assert_eq!(err.raw(), Some("{\"A\": \"x\",, }"));
    }

    #[test]
    fn array_is_not_an_object() {
        let err = parse_facet_response(r#"[{"A": "x"}, {"B": "y"}]"#, &ab()).unwrap_err();
        assert_eq!(err.kind(), ExtractionErrorKind::MalformedJson);
    }

    #[test]
    fn fenced_multiline_json_is_recovered() {
        let raw = "```json\n{\n  \"A\": \"first\\nline\",\n  \"B\": \"second\"\n}\n```";
        let parsed = parse_facet_response(raw, &ab()).unwrap();
        assert_eq!(parsed.get("A"), Some("first\nline"));
    }

    #[test]
    fn extra_keys_are_dropped() {
        let parsed =
            parse_facet_response(r#"{"B": "y", "Extra": "z", "A": "x"}"#, &ab()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.texts(), vec!["x".to_string(), "y".to_string()]);
        assert!(parsed.get("Extra").is_none());
    }

    #[test]
    fn non_string_values_are_rejected() {
        let err = parse_facet_response(r#"{"A": "x", "B": {"nested": 1}}"#, &ab()).unwrap_err();
        assert_eq!(err.kind(), ExtractionErrorKind::NonTextFacet);
    }

    #[test]
    fn instruction_lists_facets_and_appends_text() {
        let prompt = build_instruction(&ab(), "PAPER BODY");
        assert!(prompt.contains(r#"["A","B"]"#));
        assert!(prompt.contains("*only*"));
        assert!(prompt.ends_with("\n\nPAPER BODY"));
    }

    #[tokio::test]
    async fn extractor_makes_one_call_with_system_prompt() {
        let mock = Arc::new(MockCompletion::new(r#"{"A": "x", "B": "y"}"#));
        let extractor = FacetExtractor::new(mock.clone(), ab(), "You are a test.");
        let facets = extractor.extract("full text").await.unwrap();
        assert_eq!(facets.get("B"), Some("y"));
        assert_eq!(mock.call_count(), 1);
        let prompts = mock.prompts();
        assert_eq!(prompts[0].0, "You are a test.");
        assert!(prompts[0].1.ends_with("full text"));
    }

    #[tokio::test]
    async fn transport_failure_is_not_retried() {
        let mock = Arc::new(MockCompletion::with_sequence(vec![
            MockReply::Status(503),
            MockReply::Text(r#"{"A": "x", "B": "y"}"#.into()),
        ]));
        let extractor = FacetExtractor::new(mock.clone(), ab(), "sys");
        let err = extractor.extract("text").await.unwrap_err();
        assert_eq!(err.kind(), ExtractionErrorKind::Transport);
        assert!(err.raw().is_none());
        assert_eq!(mock.call_count(), 1);
    }
}
