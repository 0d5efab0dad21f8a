//! HTTP client for the writing backend.
//!
//! Streaming endpoints are exposed through [`Transport`]; the upload, analyze
//! and export calls are plain request/response helpers.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{TransportError, TransportErrorKind};
use crate::request::{OptionDescriptor, StreamRequest};
use crate::transport::{ChunkStream, Transport};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
    pub file_path: String,
    pub content_preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzeRequest {
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Writing plan proposed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub persona: String,
    pub article_type: String,
    pub system_prompt: String,
    #[serde(default)]
    pub content_outline: Vec<String>,
    #[serde(default)]
    pub writing_options: Vec<OptionDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExportResponse {
    pub download_url: String,
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// # Errors
    /// Returns an error if the configured base URL is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.effective_base_url()?, config.connect_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Uploads a reference file for analysis.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the backend rejects it.
    pub async fn upload(&self, path: &Path) -> Result<UploadResponse> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read upload file {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        tracing::debug!(file = %filename, bytes = bytes.len(), "uploading file");

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(filename),
        );
        let request = self.http.post(self.url("/upload")).multipart(form);
        send_json(request, "upload").await
    }

    /// Asks the backend for a writing plan.
    ///
    /// # Errors
    /// Returns an error on transport failure, non-2xx status, or a malformed plan.
    pub async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse> {
        tracing::debug!(topic = %request.topic, "requesting writing plan");
        send_json(self.http.post(self.url("/analyze")).json(request), "analyze").await
    }

    /// Exports arbitrary text as a document.
    ///
    /// # Errors
    /// Returns an error on transport failure or non-2xx status.
    pub async fn export_text(&self, content: &str) -> Result<ExportResponse> {
        let body = serde_json::json!({ "content": content });
        send_json(self.http.post(self.url("/generate_docx")).json(&body), "export").await
    }

    /// Exports previously generated content by the id carried in its marker.
    ///
    /// # Errors
    /// Returns an error on transport failure or non-2xx status (404 for an unknown id).
    pub async fn export_content(&self, content_id: &str) -> Result<ExportResponse> {
        let url = self.url(&format!("/docx/{content_id}"));
        send_json(self.http.post(url), "export").await
    }

    /// Resolves a download link against the backend origin.
    ///
    /// # Errors
    /// Returns an error if either URL does not parse.
    pub fn absolute_url(&self, link: &str) -> Result<String> {
        let base = url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid backend base URL: {}", self.base_url))?;
        let joined = base
            .join(link)
            .with_context(|| format!("Invalid download link: {link}"))?;
        Ok(joined.to_string())
    }
}

async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder, what: &str) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_reqwest_error(&e))
        .with_context(|| format!("{what} request failed"))?;

    let status = response.status();
    if !status.is_success() {
        let error_body = response.text().await.unwrap_or_default();
        return Err(TransportError::http_status(status.as_u16(), &error_body))
            .with_context(|| format!("{what} request failed"));
    }

    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to parse {what} response"))
}

fn classify_reqwest_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::new(TransportErrorKind::Timeout, format!("Request timed out: {e}"))
    } else if e.is_connect() {
        TransportError::new(
            TransportErrorKind::Connection,
            format!("Connection failed: {e}"),
        )
    } else if e.is_body() || e.is_decode() {
        TransportError::new(TransportErrorKind::Body, format!("Stream interrupted: {e}"))
    } else {
        TransportError::new(TransportErrorKind::Connection, format!("Network error: {e}"))
    }
}

impl Transport for HttpBackend {
    fn open(
        &self,
        request: &StreamRequest,
    ) -> impl Future<Output = Result<ChunkStream, TransportError>> + Send {
        let builder = match request {
            StreamRequest::Generate(req) => self.http.post(self.url("/write/stream")).json(req),
            StreamRequest::Expand(req) => self.http.post(self.url("/expand")).json(req),
        };
        let kind = request.kind();

        async move {
            tracing::debug!(kind, "opening stream");
            let response = builder
                .send()
                .await
                .map_err(|e| classify_reqwest_error(&e))?;

            let status = response.status();
            if !status.is_success() {
                let error_body = response.text().await.unwrap_or_default();
                return Err(TransportError::http_status(status.as_u16(), &error_body));
            }

            let chunks = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| classify_reqwest_error(&e)));
            Ok(chunks.boxed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let backend = HttpBackend::new("http://localhost:8000/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.url("/expand"), "http://localhost:8000/api/expand");
    }

    #[test]
    fn test_absolute_url_uses_backend_origin() {
        let backend = HttpBackend::new("http://localhost:8000/api", Duration::from_secs(1)).unwrap();
        assert_eq!(
            backend
                .absolute_url("/static/downloads/article_ab12.docx")
                .unwrap(),
            "http://localhost:8000/static/downloads/article_ab12.docx"
        );
        assert_eq!(
            backend.absolute_url("https://cdn.example/x.docx").unwrap(),
            "https://cdn.example/x.docx"
        );
    }

    #[test]
    fn test_analyze_response_parses_plan() {
        let plan: AnalyzeResponse = serde_json::from_value(serde_json::json!({
            "persona": "资深科技记者",
            "article_type": "深度报道",
            "system_prompt": "You are a journalist.",
            "content_outline": ["引言", "正文"],
            "writing_options": [
                {"id": "tone", "label": "语气", "type": "select", "options": ["正式", "轻松"], "default": "正式"}
            ]
        }))
        .unwrap();
        assert_eq!(plan.content_outline.len(), 2);
        assert_eq!(plan.writing_options[0].id, "tone");
    }
}
