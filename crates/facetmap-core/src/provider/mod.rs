//! Completion and embedding capabilities, and their HTTP implementation.

pub mod mock;
pub mod openai;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

pub use openai::OpenAiClient;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect(),
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Decode(_) | ProviderError::Config(_) => false,
        }
    }
}

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// A chat-completion model.
pub trait CompletionProvider: Send + Sync {
    /// Model or deployment name, for logs.
    fn model(&self) -> &str;

    /// Send one system + user exchange and return the assistant's text.
    fn complete<'a>(&'a self, system_prompt: &'a str, user_prompt: &'a str)
    -> ProviderFuture<'a, String>;
}

/// A text embedding model.
pub trait EmbeddingProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Embed every text in one request. The i-th vector belongs to `texts[i]`.
    fn embed<'a>(&'a self, texts: &'a [String]) -> ProviderFuture<'a, Vec<Vec<f32>>>;
}
