//! Scripted providers for tests: no network, deterministic output.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{CompletionProvider, EmbeddingProvider, ProviderError, ProviderFuture};

/// A scripted reply from [`MockCompletion`].
#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    /// Simulate a non-success HTTP status.
    Status(u16),
}

/// Completion provider that replays a sequence of replies, repeating the last.
pub struct MockCompletion {
    replies: Mutex<Vec<MockReply>>,
    fallback: MockReply,
    prompts: Mutex<Vec<(String, String)>>,
    call_count: AtomicUsize,
}

impl MockCompletion {
    /// Always answer with `text`.
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_sequence(vec![MockReply::Text(text.into())])
    }

    /// Answer with `replies` in order; the last one repeats once exhausted.
    pub fn with_sequence(mut replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "sequence must have at least one reply");
        let fallback = replies[replies.len() - 1].clone();
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            fallback,
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every (system, user) prompt pair received so far.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn next_reply(&self) -> MockReply {
        self.replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl CompletionProvider for MockCompletion {
    fn model(&self) -> &str {
        "mock-completion"
    }

    fn complete<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push((system_prompt.to_string(), user_prompt.to_string()));
            }
            match self.next_reply() {
                MockReply::Text(text) => Ok(text),
                MockReply::Status(status) => Err(ProviderError::Status {
                    status,
                    body: "mock failure".into(),
                }),
            }
        })
    }
}

/// Embedding provider producing a deterministic vector per input text.
///
/// Component 0 is the input's position in the batch, component 1 its byte
/// length, and the rest a cheap hash of the text, so tests can check both
/// order and identity.
pub struct MockEmbedding {
    dimension: usize,
    call_count: AtomicUsize,
    /// When set, drop the last vector of every response.
    short_response: bool,
}

impl MockEmbedding {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension >= 2, "mock embeddings need at least two components");
        Self {
            dimension,
            call_count: AtomicUsize::new(0),
            short_response: false,
        }
    }

    /// Misbehave by returning one vector fewer than requested.
    pub fn returning_short_batches(mut self) -> Self {
        self.short_response = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, position: usize, text: &str) -> Vec<f32> {
        let mut v = Vec::with_capacity(self.dimension);
        v.push(position as f32);
        v.push(text.len() as f32);
        let mut h: u32 = 2166136261;
        for b in text.bytes() {
            h ^= b as u32;
            h = h.wrapping_mul(16777619);
        }
        for i in 2..self.dimension {
            let mixed = h.rotate_left((i % 32) as u32) ^ (i as u32);
            v.push((mixed % 1000) as f32 / 1000.0);
        }
        v
    }
}

impl EmbeddingProvider for MockEmbedding {
    fn model(&self) -> &str {
        "mock-embedding"
    }

    fn embed<'a>(&'a self, texts: &'a [String]) -> ProviderFuture<'a, Vec<Vec<f32>>> {
        Box::pin(async move {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut out: Vec<Vec<f32>> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| self.vector_for(i, t))
                .collect();
            if self.short_response {
                out.pop();
            }
            Ok(out)
        })
    }
}
