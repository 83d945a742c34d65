//! Integration tests for the [`Aggregator`].
//!
//! Papers are written to a temp directory in the on-disk sections layout and
//! the models are replaced by the scripted providers, so no HTTP requests are
//! made.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use facetmap_core::provider::mock::{MockCompletion, MockEmbedding, MockReply};
use facetmap_core::{
    AggregateEvent, Aggregator, Config, DEFAULT_FACETS, FacetSet, PaperStatus, TokenCounter,
};

fn words() -> Arc<dyn TokenCounter> {
    Arc::new(|text: &str| text.split_whitespace().count())
}

/// A completion reply covering every default facet.
fn full_reply() -> String {
    let object: serde_json::Map<String, serde_json::Value> = DEFAULT_FACETS
        .iter()
        .map(|f| (f.to_string(), serde_json::Value::String(format!("summary of {f}"))))
        .collect();
    format!("Here you go:\n{}", serde_json::Value::Object(object))
}

fn write_paper(root: &Path, name: &str, sections: &[(&str, &str)]) -> PathBuf {
    let folder = root.join(format!("{name}_sections"));
    std::fs::create_dir_all(&folder).unwrap();
    for (id, text) in sections {
        std::fs::write(folder.join(format!("{name}_section_{id}.txt")), text).unwrap();
    }
    folder
}

fn two_papers(root: &Path) -> Vec<PathBuf> {
    vec![
        write_paper(
            root,
            "beta",
            &[("1", "Introduction\n\nBeta studies caching."), ("2", "Method\n\nWe cache.")],
        ),
        write_paper(root, "alpha", &[("1", "Introduction\n\nAlpha studies parsing.")]),
    ]
}

#[tokio::test]
async fn two_papers_stack_into_labeled_matrix() {
    let root = tempfile::tempdir().unwrap();
    let folders = two_papers(root.path());

    let completion = Arc::new(MockCompletion::new(full_reply()));
    let embedding = Arc::new(MockEmbedding::new(1536));
    let aggregator = Aggregator::new(Config::default(), completion.clone(), embedding.clone(), words());

    let aggregate = aggregator.aggregate(&folders, |_| {}).await;

    assert_eq!(aggregate.matrix.dim(), (10, 1536));
    assert_eq!(aggregate.labels.len(), 10);
    assert_eq!(aggregate.labels[0], "Paper1: Problem Description and RQ");
    assert_eq!(aggregate.labels[4], "Paper1: Limitation and Future Work");
    assert_eq!(aggregate.labels[5], "Paper2: Problem Description and RQ");
    assert_eq!(aggregate.labels[9], "Paper2: Limitation and Future Work");
    assert_eq!(completion.call_count(), 2);
    assert_eq!(embedding.call_count(), 2);

    // Folders are numbered in sorted order: alpha is Paper1.
    assert!(aggregate.papers[0].folder.ends_with("alpha_sections"));
    let prompts = completion.prompts();
    assert!(prompts[0].1.contains("Alpha studies parsing."));
    assert!(prompts[1].1.ends_with("Introduction\n\nBeta studies caching.\n\nMethod\n\nWe cache."));

    // Row i is the embedding of the i-th facet text: component 0 is the
    // position within the paper's batch.
    for (i, row) in aggregate.matrix.rows().into_iter().enumerate() {
        assert_eq!(row[0], (i % 5) as f64);
        let facet = DEFAULT_FACETS[i % 5];
        assert_eq!(row[1], format!("summary of {facet}").len() as f64);
    }
}

#[tokio::test]
async fn failing_paper_is_isolated_and_keeps_its_number() {
    let root = tempfile::tempdir().unwrap();
    let folders = two_papers(root.path());

    let completion = Arc::new(MockCompletion::with_sequence(vec![
        MockReply::Text("I'd rather not.".into()),
        MockReply::Text(full_reply()),
    ]));
    let embedding = Arc::new(MockEmbedding::new(8));
    let aggregator = Aggregator::new(Config::default(), completion, embedding.clone(), words());

    let aggregate = aggregator.aggregate(&folders, |_| {}).await;

    assert_eq!(aggregate.matrix.dim(), (5, 8));
    assert!(aggregate.labels.iter().all(|l| l.starts_with("Paper2: ")));
    assert_eq!(aggregate.failed().count(), 1);
    assert_eq!(aggregate.succeeded().count(), 1);
    match &aggregate.papers[0].status {
        PaperStatus::Failed { reason } => assert!(reason.contains("no JSON object")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(embedding.call_count(), 1);
}

#[tokio::test]
async fn oversized_first_section_records_zero_sections_kept() {
    let root = tempfile::tempdir().unwrap();
    let folder = write_paper(
        root.path(),
        "long",
        &[("1", "one two three four five six seven eight nine ten"), ("2", "short")],
    );
    let completion = Arc::new(MockCompletion::new(full_reply()));
    let config = Config {
        token_budget: 5,
        ..Config::default()
    };
    let aggregator = Aggregator::new(config, completion.clone(), Arc::new(MockEmbedding::new(4)), words());

    let aggregate = aggregator.aggregate(&[folder], |_| {}).await;

    assert_eq!(aggregate.matrix.nrows(), 0);
    assert_eq!(completion.call_count(), 0);
    match &aggregate.papers[0].status {
        PaperStatus::Failed { reason } => assert!(reason.contains("zero sections kept")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn budget_limits_the_prompt_and_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let folder = write_paper(
        root.path(),
        "p",
        &[("1", "Intro\n\naaa bbb"), ("2", "Body\n\nccc ddd eee"), ("3", "End\n\nfff")],
    );
    let completion = Arc::new(MockCompletion::new(full_reply()));
    let config = Config {
        token_budget: 7,
        ..Config::default()
    };
    let aggregator = Aggregator::new(config, completion.clone(), Arc::new(MockEmbedding::new(4)), words());

    let events = Mutex::new(Vec::new());
    let aggregate = aggregator
        .aggregate(&[folder], |e| events.lock().unwrap().push(e))
        .await;

    assert_eq!(aggregate.succeeded().count(), 1);
    let prompt = &completion.prompts()[0].1;
    assert!(prompt.contains("Body\n\nccc ddd eee"));
    assert!(!prompt.contains("fff"));

    let events = events.into_inner().unwrap();
    let selected = events
        .iter()
        .find_map(|e| match e {
            AggregateEvent::SectionsSelected { sections, .. } => Some(*sections),
            _ => None,
        })
        .unwrap();
    assert_eq!((selected.kept, selected.total, selected.tokens), (2, 3, 7));
    assert!(matches!(events.first(), Some(AggregateEvent::PaperStarted { paper_id: 1, .. })));
    assert!(matches!(events.last(), Some(AggregateEvent::PaperFinished(_))));
}

#[tokio::test]
async fn cache_is_written_and_reused() {
    let root = tempfile::tempdir().unwrap();
    let cache_dir = root.path().join("embeddings");
    let folders = two_papers(root.path());

    let first = Aggregator::new(
        Config::default(),
        Arc::new(MockCompletion::new(full_reply())),
        Arc::new(MockEmbedding::new(6)),
        words(),
    )
    .with_cache_dir(&cache_dir);
    let computed = first.aggregate(&folders, |_| {}).await;
    assert!(cache_dir.join("Paper2").join("Paper2_facets_emb.npy").is_file());

    let completion = Arc::new(MockCompletion::new("unused"));
    let embedding = Arc::new(MockEmbedding::new(6));
    let second = Aggregator::new(Config::default(), completion.clone(), embedding.clone(), words())
        .with_cache_dir(&cache_dir)
        .reuse_cache(true);
    let reused = second.aggregate(&folders, |_| {}).await;

    assert_eq!(completion.call_count(), 0);
    assert_eq!(embedding.call_count(), 0);
    assert_eq!(reused.matrix, computed.matrix);
    assert_eq!(reused.labels, computed.labels);
    assert!(matches!(
        reused.papers[0].status,
        PaperStatus::Succeeded { sections: None, .. }
    ));

    let (matrix, labels) = facetmap_core::cache::load_all(&cache_dir).unwrap();
    assert_eq!(matrix, computed.matrix);
    assert_eq!(labels, computed.labels);
}

#[tokio::test]
async fn cache_with_other_facets_is_recomputed() {
    let root = tempfile::tempdir().unwrap();
    let cache_dir = root.path().join("embeddings");
    let folders = two_papers(root.path());

    let narrow = Config {
        facets: FacetSet::new(["Problem Description and RQ"]).unwrap(),
        ..Config::default()
    };
    Aggregator::new(
        narrow,
        Arc::new(MockCompletion::new(full_reply())),
        Arc::new(MockEmbedding::new(6)),
        words(),
    )
    .with_cache_dir(&cache_dir)
    .aggregate(&folders, |_| {})
    .await;

    let completion = Arc::new(MockCompletion::new(full_reply()));
    let aggregate = Aggregator::new(Config::default(), completion.clone(), Arc::new(MockEmbedding::new(6)), words())
        .with_cache_dir(&cache_dir)
        .reuse_cache(true)
        .aggregate(&folders, |_| {})
        .await;

    assert_eq!(completion.call_count(), 2);
    assert_eq!(aggregate.matrix.nrows(), 10);
}

#[tokio::test]
async fn failed_and_vanished_papers_leave_the_cache() {
    let root = tempfile::tempdir().unwrap();
    let cache_dir = root.path().join("embeddings");
    let mut folders = two_papers(root.path());
    folders.push(write_paper(root.path(), "gamma", &[("1", "Introduction\n\nGamma.")]));

    Aggregator::new(
        Config::default(),
        Arc::new(MockCompletion::new(full_reply())),
        Arc::new(MockEmbedding::new(6)),
        words(),
    )
    .with_cache_dir(&cache_dir)
    .aggregate(&folders, |_| {})
    .await;
    assert!(cache_dir.join("Paper3").is_dir());

    // Second run: gamma is gone and alpha (Paper1) fails extraction.
    folders.pop();
    let completion = Arc::new(MockCompletion::with_sequence(vec![
        MockReply::Text("no json".into()),
        MockReply::Text(full_reply()),
    ]));
    let aggregate = Aggregator::new(Config::default(), completion, Arc::new(MockEmbedding::new(6)), words())
        .with_cache_dir(&cache_dir)
        .aggregate(&folders, |_| {})
        .await;
    assert_eq!(aggregate.failed().count(), 1);

    assert!(!cache_dir.join("Paper1").exists());
    assert!(!cache_dir.join("Paper3").exists());
    let (matrix, labels) = facetmap_core::cache::load_all(&cache_dir).unwrap();
    assert_eq!(matrix, aggregate.matrix);
    assert_eq!(labels, aggregate.labels);
    assert!(labels.iter().all(|l| l.starts_with("Paper2: ")));
}
