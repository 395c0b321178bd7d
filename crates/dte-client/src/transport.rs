//! Transport seam between the client and the network
//!
//! The client speaks two wire shapes: SOAP envelopes posted to the RPC
//! endpoints, and one multipart form for the document upload. Both are
//! single attempts; retrying is the caller's business.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::multipart::{Form, Part};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Multipart upload of a spooled document
#[derive(Clone)]
pub struct UploadRequest {
    pub url: String,
    pub token: String,
    /// Text fields, in order
    pub fields: Vec<(String, String)>,
    pub file_path: PathBuf,
    pub file_name: String,
    pub content_type: String,
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("url", &self.url)
            .field("fields", &self.fields)
            .field("file_path", &self.file_path)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Sends one request and returns the raw response body
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_soap(&self, url: &str, envelope: &str) -> Result<String>;

    async fn post_upload(&self, request: &UploadRequest) -> Result<String>;
}

/// HTTP transport over `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, verify_tls: bool, user_agent: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ClientError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(
            Duration::from_secs(config.http_timeout_secs),
            config.verify_tls,
            &config.user_agent,
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_soap(&self, url: &str, envelope: &str) -> Result<String> {
        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", "")
            .body(envelope.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(url, status = status.as_u16(), bytes = body.len(), "SOAP response");

        // Faults arrive as HTTP 500 with a well-formed envelope
        if !status.is_success() && !body.contains("Fault") {
            return Err(ClientError::Transport(format!("HTTP {} from {}", status, url)));
        }
        Ok(body)
    }

    async fn post_upload(&self, request: &UploadRequest) -> Result<String> {
        let contents = tokio::fs::read(&request.file_path).await?;
        let part = Part::bytes(contents)
            .file_name(request.file_name.clone())
            .mime_str(&request.content_type)?;

        let mut form = Form::new();
        for (name, value) in &request.fields {
            form = form.text(name.clone(), value.clone());
        }
        let form = form.part("archivo", part);

        let response = self
            .http
            .post(&request.url)
            .header(COOKIE, format!("TOKEN={}", request.token))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(url = %request.url, status = status.as_u16(), "upload response");

        if !status.is_success() {
            return Err(ClientError::Transport(format!(
                "HTTP {} from {}",
                status, request.url
            )));
        }
        Ok(body)
    }
}
