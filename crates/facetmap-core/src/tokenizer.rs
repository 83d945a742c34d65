use thiserror::Error;

use crate::Config;

#[derive(Error, Debug)]
#[error("failed to load tokenizer: {0}")]
pub struct TokenizerError(String);

/// Counts model-specific tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count_tokens(&self, text: &str) -> usize {
        self(text)
    }
}

/// BPE token counter backed by `tiktoken-rs`.
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
    model: String,
}

impl TiktokenCounter {
    /// Tokenizer for `model`, falling back to `cl100k_base` for names tiktoken
    /// does not know (Azure deployment names, for instance).
    pub fn for_model(model: &str) -> Result<Self, TokenizerError> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => {
                tracing::debug!(model, "unknown model for tiktoken, using cl100k_base");
                tiktoken_rs::cl100k_base().map_err(|e| TokenizerError(e.to_string()))?
            }
        };
        Ok(Self {
            bpe,
            model: model.to_string(),
        })
    }

    /// Budget tokenizer for a run: sections are counted with the embedding
    /// model's encoding.
    pub fn for_config(config: &Config) -> Result<Self, TokenizerError> {
        Self::for_model(&config.embedding_model)
    }

    /// Model name the encoding was resolved from.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}
