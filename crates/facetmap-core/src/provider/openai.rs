//! OpenAI-compatible HTTP client (OpenAI and Azure OpenAI dialects).

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CompletionProvider, EmbeddingProvider, ProviderError, ProviderFuture};
use crate::{ApiFlavor, Config};

/// One client serving both the completion and the embedding capability.
pub struct OpenAiClient {
    http: reqwest::Client,
    flavor: ApiFlavor,
    endpoint: String,
    api_version: String,
    embedding_model: String,
    completion_model: String,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::Config("missing API key".into()))?;
        if config.api_endpoint.trim().is_empty() {
            return Err(ProviderError::Config("missing API endpoint".into()));
        }

        let mut headers = HeaderMap::new();
        match config.api_flavor {
            ApiFlavor::OpenAi => {
                let auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
                    .map_err(|_| ProviderError::Config("invalid API key".into()))?;
                headers.insert(AUTHORIZATION, auth);
            }
            ApiFlavor::Azure => {
                let key = HeaderValue::from_str(api_key)
                    .map_err(|_| ProviderError::Config("invalid API key".into()))?;
                headers.insert(HeaderName::from_static("api-key"), key);
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            http: builder.build()?,
            flavor: config.api_flavor,
            endpoint: config.api_endpoint.trim().trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            embedding_model: config.embedding_model.clone(),
            completion_model: config.completion_model.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn embeddings_url(&self) -> String {
        self.url("embeddings", &self.embedding_model)
    }

    pub fn chat_url(&self) -> String {
        self.url("chat/completions", &self.completion_model)
    }

    fn url(&self, operation: &str, model: &str) -> String {
        match self.flavor {
            ApiFlavor::OpenAi => format!("{}/{}", self.endpoint, operation),
            ApiFlavor::Azure => format!(
                "{}/openai/deployments/{}/{}?api-version={}",
                self.endpoint,
                urlencoding::encode(model),
                operation,
                self.api_version
            ),
        }
    }

    async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send,
    {
        let mut attempt = 0u32;
        loop {
            match self.send_once(url, body).await {
                Ok(parsed) => return Ok(parsed),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let wait = retry_backoff(attempt);
                    tracing::warn!(
                        url,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "provider request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once<B, R>(&self, url: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send,
    {
        let resp = self.http.post(url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<R>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

/// Exponential backoff: 1s, 2s, 4s, ... capped at 16s.
pub(crate) fn retry_backoff(attempt: u32) -> Duration {
    let capped = attempt.min(5);
    Duration::from_millis(500 * (1u64 << capped))
}

impl CompletionProvider for OpenAiClient {
    fn model(&self) -> &str {
        &self.completion_model
    }

    fn complete<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let request = ChatRequest {
                model: &self.completion_model,
                messages: [
                    ChatMessage {
                        role: "system",
                        content: system_prompt,
                    },
                    ChatMessage {
                        role: "user",
                        content: user_prompt,
                    },
                ],
            };
            let url = self.chat_url();
            tracing::debug!(url = %url, model = %self.completion_model, chars = user_prompt.len(), "chat completion request");
            let response: ChatResponse = self.post_json(&url, &request).await?;
            response
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| ProviderError::Decode("completion returned no content".into()))
        })
    }
}

impl EmbeddingProvider for OpenAiClient {
    fn model(&self) -> &str {
        &self.embedding_model
    }

    fn embed<'a>(&'a self, texts: &'a [String]) -> ProviderFuture<'a, Vec<Vec<f32>>> {
        Box::pin(async move {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let request = EmbeddingRequest {
                model: &self.embedding_model,
                input: texts,
            };
            let url = self.embeddings_url();
            tracing::debug!(url = %url, model = %self.embedding_model, inputs = texts.len(), "embedding request");
            let mut response: EmbeddingResponse = self.post_json(&url, &request).await?;
            response.data.sort_by_key(|d| d.index);
            Ok(response.data.into_iter().map(|d| d.embedding).collect())
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(flavor: ApiFlavor, endpoint: &str) -> Config {
        Config {
            api_flavor: flavor,
            api_endpoint: endpoint.to_string(),
            api_key: Some("test-key".into()),
            embedding_model: "text-embedding-3-small".into(),
            completion_model: "gpt-4o-mini".into(),
            ..Config::default()
        }
    }

    #[test]
    fn openai_urls() {
        let client =
            OpenAiClient::from_config(&config(ApiFlavor::OpenAi, "https://api.openai.com/v1/"))
                .unwrap();
        assert_eq!(client.embeddings_url(), "https://api.openai.com/v1/embeddings");
        assert_eq!(client.chat_url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn azure_urls_carry_deployment_and_version() {
        let mut cfg = config(ApiFlavor::Azure, "https://example.openai.azure.com");
        cfg.completion_model = "gpt 4o".into();
        let client = OpenAiClient::from_config(&cfg).unwrap();
        assert_eq!(
            client.embeddings_url(),
            "https://example.openai.azure.com/openai/deployments/text-embedding-3-small/embeddings?api-version=2024-12-01-preview"
        );
        assert_eq!(
            client.chat_url(),
            "https://example.openai.azure.com/openai/deployments/gpt%204o/chat/completions?api-version=2024-12-01-preview"
        );
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let mut cfg = config(ApiFlavor::OpenAi, "https://api.openai.com/v1");
        cfg.api_key = Some("   ".into());
        assert!(matches!(
            OpenAiClient::from_config(&cfg),
            Err(ProviderError::Config(_))
        ));
        cfg.api_key = None;
        assert!(OpenAiClient::from_config(&cfg).is_err());
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(retry_backoff(1), Duration::from_secs(1));
        assert_eq!(retry_backoff(2), Duration::from_secs(2));
        assert_eq!(retry_backoff(5), Duration::from_secs(16));
        assert_eq!(retry_backoff(9), Duration::from_secs(16));
    }

    #[test]
    fn transient_statuses() {
        let rate_limited = ProviderError::Status {
            status: 429,
            body: String::new(),
        };
        let unauthorized = ProviderError::Status {
            status: 401,
            body: String::new(),
        };
        assert!(rate_limited.is_transient());
        assert!(!unauthorized.is_transient());
        assert!(!ProviderError::Decode("x".into()).is_transient());
    }

    #[test]
    fn embedding_response_is_reordered_by_index() {
        let json = r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0]);
    }
}
