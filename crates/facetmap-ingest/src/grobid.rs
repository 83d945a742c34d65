//! Minimal GROBID client: full-text PDF processing only.

use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::multipart::{Form, Part};

use crate::IngestError;

pub const DEFAULT_GROBID_URL: &str = "http://localhost:8070";

const FULLTEXT_PATH: &str = "/api/processFulltextDocument";

#[derive(Debug, Clone)]
pub struct GrobidClient {
    http: reqwest::Client,
    base_url: String,
}

impl GrobidClient {
    /// `timeout` bounds a whole request; GROBID can take minutes on long PDFs.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, IngestError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn fulltext_url(&self) -> String {
        format!("{}{}", self.base_url, FULLTEXT_PATH)
    }

    /// Upload `pdf` as the multipart field `input` and return the TEI XML.
    pub async fn process_fulltext(&self, pdf: &Path) -> Result<String, IngestError> {
        let bytes = tokio::fs::read(pdf)
            .await
            .map_err(|e| IngestError::io(pdf, e))?;
        let file_name = pdf
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input.pdf".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")?;
        let form = Form::new().part("input", part);

        let started = Instant::now();
        let resp = self
            .http
            .post(self.fulltext_url())
            .multipart(form)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        let elapsed = started.elapsed();

        if !status.is_success() {
            tracing::warn!(pdf = %pdf.display(), status = status.as_u16(), "GROBID request failed");
            return Err(IngestError::Status {
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!(
            pdf = %pdf.display(),
            elapsed_secs = elapsed.as_secs_f64(),
            bytes = body.len(),
            "GROBID processing done"
        );
        Ok(body)
    }
}
