//! Remote protocol client
//!
//! Every operation is a single request/response exchange built on
//! [`DteClient::call_remote_operation`]. Polling is never automatic: callers
//! re-poll until [`RemoteStatus::is_terminal`].

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use dte_core::{Certificate, Element, Encoding, Rut, XmlDocument};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::retry::RetryPolicy;
use crate::soap;
use crate::spool::SpooledDocument;
use crate::status::{
    parse_document_status, parse_email_status, parse_receipt, parse_submission_status,
    ReceiptStatus, RemoteStatus,
};
use crate::submission::SubmissionRecord;
use crate::token::{CachedToken, FileTokenCache, KeyLocks, MemoryTokenCache, TokenCache};
use crate::transport::{HttpTransport, Transport, UploadRequest};

/// Status code of a successful seed or token exchange
const AUTH_OK: &str = "00";

/// Identifies one issued document for the validation queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentQuery {
    pub issuer: Rut,
    pub receiver: Rut,
    pub document_type: u16,
    pub folio: u64,
    pub issue_date: NaiveDate,
    pub total_amount: u64,
}

impl DocumentQuery {
    fn issue_date_arg(&self) -> String {
        self.issue_date.format("%d%m%Y").to_string()
    }
}

pub struct DteClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenCache>,
    locks: KeyLocks,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl DteClient {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenCache>,
    ) -> Self {
        let retry = config.retry_policy();
        Self {
            config,
            transport,
            tokens,
            locks: KeyLocks::new(),
            retry,
            cancel: CancellationToken::new(),
        }
    }

    /// HTTP transport and the token cache the configuration asks for
    pub fn with_http(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::from_config(&config)?);
        let tokens: Arc<dyn TokenCache> = match &config.token_cache_dir {
            Some(dir) => Arc::new(FileTokenCache::new(dir)?),
            None => Arc::new(MemoryTokenCache::new()),
        };
        Ok(Self::new(config, transport, tokens))
    }

    /// Abort retries and backoff sleeps once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Perform one named remote operation and return its payload
    ///
    /// Transport failures and unreadable envelopes are retried up to
    /// `max_retries` times (default and ceiling 10) with linear backoff. A
    /// SOAP fault is returned at once.
    pub async fn call_remote_operation(
        &self,
        service: &str,
        operation: &str,
        args: &[(&str, String)],
        max_retries: Option<u32>,
    ) -> Result<String> {
        let url = self.config.endpoint_url(service);
        let envelope = soap::build_request(operation, args);
        let (url, envelope) = (&url, &envelope);

        self.retry
            .run(operation, max_retries, &self.cancel, |_| {
                let transport = Arc::clone(&self.transport);
                async move {
                    let raw = transport.post_soap(url, envelope).await?;
                    soap::parse_response(&raw, operation)
                }
            })
            .await
    }

    fn fresh_token(&self, key: &str) -> Option<String> {
        self.tokens
            .get(key)
            .filter(|cached| cached.is_fresh(Utc::now()))
            .map(|cached| cached.token)
    }

    /// Token for `certificate`, from cache or a seed/token exchange
    pub async fn authenticate(&self, certificate: &Certificate) -> Result<String> {
        let key = certificate.cache_key();
        if let Some(token) = self.fresh_token(&key) {
            debug!(holder = %certificate.identity().holder_id, "token cache hit");
            return Ok(token);
        }

        let lock = self.locks.lock_for(&key);
        let result = {
            let _guard = lock.lock().await;
            self.exchange_locked(certificate, &key).await
        };
        drop(lock);
        self.locks.release(&key);
        result
    }

    /// Cache re-check and exchange, run under the per-identity lock
    async fn exchange_locked(&self, certificate: &Certificate, key: &str) -> Result<String> {
        if let Some(token) = self.fresh_token(key) {
            debug!(holder = %certificate.identity().holder_id, "token obtained by concurrent caller");
            return Ok(token);
        }

        debug!(holder = %certificate.identity().holder_id, "token cache miss");
        let seed = self.fetch_seed().await?;
        let token = self.exchange_seed(&seed, certificate).await?;

        let cached = CachedToken::new(token.clone(), Utc::now(), self.config.token_ttl());
        if let Err(e) = self.tokens.put(key, cached) {
            warn!(error = %e, "failed to cache token");
        }
        info!(holder = %certificate.identity().holder_id, "authenticated");
        Ok(token)
    }

    async fn fetch_seed(&self) -> Result<String> {
        let payload = self.call_remote_operation("CrSeed", "getSeed", &[], None).await?;
        let response = soap::parse_payload(&payload, "getSeed")?;
        check_auth_status(&response.root, "getSeed")?;
        response
            .root
            .find("SEMILLA")
            .map(|e| e.text().trim().to_string())
            .filter(|seed| !seed.is_empty())
            .ok_or_else(|| ClientError::Authentication("getSeed: no seed in response".into()))
    }

    async fn exchange_seed(&self, seed: &str, certificate: &Certificate) -> Result<String> {
        let request = Element::new("getToken").with_child(
            Element::new("item").with_child(Element::text_element("Semilla", seed)),
        );
        let mut document = XmlDocument::new(request);
        document.encoding = Some(Encoding::Utf8);
        dte_core::sign(&mut document, None, certificate)?;

        let payload = self
            .call_remote_operation(
                "GetTokenFromSeed",
                "getToken",
                &[("pszXml", document.to_xml_string())],
                None,
            )
            .await?;
        let response = soap::parse_payload(&payload, "getToken")?;
        check_auth_status(&response.root, "getToken")?;
        response
            .root
            .find("TOKEN")
            .map(|e| e.text().trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ClientError::Authentication("getToken: no token in response".into()))
    }

    /// Upload a signed document and return its tracking id
    ///
    /// The document is spooled to a temporary file for the multipart
    /// request; the file is gone when this returns, whatever the outcome.
    pub async fn upload(
        &self,
        certificate: &Certificate,
        document: &[u8],
        company: &Rut,
        compress: bool,
    ) -> Result<u64> {
        let sender: Rut = certificate.identity().holder_id.parse()?;
        let token = self.authenticate(certificate).await?;

        let spooled = SpooledDocument::create(self.config.spool_dir.as_deref(), document, compress)?;
        let request = UploadRequest {
            url: self.config.upload_url(),
            token,
            fields: vec![
                ("rutSender".to_string(), sender.number().to_string()),
                ("dvSender".to_string(), sender.check_digit().to_string()),
                ("rutCompany".to_string(), company.number().to_string()),
                ("dvCompany".to_string(), company.check_digit().to_string()),
            ],
            file_path: spooled.path().to_path_buf(),
            file_name: spooled.file_name(),
            content_type: spooled.content_type().to_string(),
        };
        let request = &request;

        let receipt = self
            .retry
            .run("upload", None, &self.cancel, |_| {
                let transport = Arc::clone(&self.transport);
                async move {
                    let body = transport.post_upload(request).await?;
                    parse_receipt(&body)
                }
            })
            .await?;
        drop(spooled);

        if receipt.status != ReceiptStatus::Ok {
            if receipt.status == ReceiptStatus::NotAuthenticated {
                self.tokens.remove(&certificate.cache_key());
            }
            warn!(status = %receipt.status.code(), company = %company, "upload rejected");
            return Err(ClientError::UploadRejected(Box::new(receipt.to_remote_status())));
        }

        let track_id = receipt.track_id()?;
        info!(track_id, company = %company, bytes = document.len(), "document uploaded");
        Ok(track_id)
    }

    /// [`DteClient::upload`] for an in-memory document, serialized in its
    /// declared encoding
    pub async fn upload_document(
        &self,
        certificate: &Certificate,
        document: &XmlDocument,
        company: &Rut,
        compress: bool,
    ) -> Result<u64> {
        self.upload(certificate, &document.to_bytes(), company, compress)
            .await
    }

    /// Upload and start tracking the submission
    pub async fn submit(
        &self,
        certificate: &Certificate,
        document: &XmlDocument,
        company: &Rut,
        compress: bool,
    ) -> Result<SubmissionRecord> {
        let track_id = self
            .upload_document(certificate, document, company, compress)
            .await?;
        Ok(SubmissionRecord::new(track_id, *company, Utc::now()))
    }

    /// One status query for an uploaded submission
    pub async fn poll_status(
        &self,
        certificate: &Certificate,
        track_id: u64,
        company: &Rut,
    ) -> Result<RemoteStatus> {
        let token = self.authenticate(certificate).await?;
        let payload = self
            .call_remote_operation(
                "QueryEstUp",
                "getEstUp",
                &[
                    ("RutCompania", company.number().to_string()),
                    ("DvCompania", company.check_digit().to_string()),
                    ("TrackId", track_id.to_string()),
                    ("Token", token),
                ],
                None,
            )
            .await?;
        let status = parse_submission_status(&payload)?;
        info!(
            track_id,
            code = %status.code,
            terminal = status.is_terminal(),
            "submission status"
        );
        Ok(status)
    }

    /// Poll and fold the answer into `record`
    pub async fn refresh(
        &self,
        certificate: &Certificate,
        record: &mut SubmissionRecord,
    ) -> Result<RemoteStatus> {
        let status = self
            .poll_status(certificate, record.track_id, &record.taxpayer_id)
            .await?;
        record.apply_status(status.clone());
        Ok(status)
    }

    /// Ask the authority to email its detailed report for a submission
    pub async fn request_status_by_email(
        &self,
        certificate: &Certificate,
        track_id: u64,
        company: &Rut,
    ) -> Result<RemoteStatus> {
        let token = self.authenticate(certificate).await?;
        let payload = self
            .call_remote_operation(
                "wsDTECorreo",
                "reenvioCorreo",
                &[
                    ("Token", token),
                    ("RutEmpresa", company.number().to_string()),
                    ("DvEmpresa", company.check_digit().to_string()),
                    ("TrackId", track_id.to_string()),
                ],
                None,
            )
            .await?;
        parse_email_status(&payload)
    }

    /// Validate an issued document against the authority's records
    pub async fn query_document_status(
        &self,
        certificate: &Certificate,
        query: &DocumentQuery,
    ) -> Result<RemoteStatus> {
        let consultant: Rut = certificate.identity().holder_id.parse()?;
        let token = self.authenticate(certificate).await?;
        let payload = self
            .call_remote_operation(
                "QueryEstDte",
                "getEstDte",
                &[
                    ("RutConsultante", consultant.number().to_string()),
                    ("DvConsultante", consultant.check_digit().to_string()),
                    ("RutCompania", query.issuer.number().to_string()),
                    ("DvCompania", query.issuer.check_digit().to_string()),
                    ("RutReceptor", query.receiver.number().to_string()),
                    ("DvReceptor", query.receiver.check_digit().to_string()),
                    ("TipoDte", query.document_type.to_string()),
                    ("FolioDte", query.folio.to_string()),
                    ("FechaEmisionDte", query.issue_date_arg()),
                    ("MontoDte", query.total_amount.to_string()),
                    ("Token", token),
                ],
                None,
            )
            .await?;
        parse_document_status(&payload, false)
    }

    /// Like [`DteClient::query_document_status`], also checking the
    /// document's signature value
    pub async fn query_document_status_with_signature(
        &self,
        certificate: &Certificate,
        query: &DocumentQuery,
        signature: &str,
    ) -> Result<RemoteStatus> {
        let token = self.authenticate(certificate).await?;
        let payload = self
            .call_remote_operation(
                "QueryEstDteAv",
                "getEstDteAv",
                &[
                    ("RutEmpresa", query.issuer.number().to_string()),
                    ("DvEmpresa", query.issuer.check_digit().to_string()),
                    ("RutReceptor", query.receiver.number().to_string()),
                    ("DvReceptor", query.receiver.check_digit().to_string()),
                    ("TipoDte", query.document_type.to_string()),
                    ("FolioDte", query.folio.to_string()),
                    ("FechaEmisionDte", query.issue_date_arg()),
                    ("MontoDte", query.total_amount.to_string()),
                    ("FirmaDte", signature.split_whitespace().collect()),
                    ("Token", token),
                ],
                None,
            )
            .await?;
        parse_document_status(&payload, true)
    }
}

fn check_auth_status(root: &Element, operation: &str) -> Result<()> {
    let header = root.find("RESP_HDR");
    let estado = header
        .and_then(|h| h.child_text("ESTADO"))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if estado == AUTH_OK {
        return Ok(());
    }
    let glosa = header
        .and_then(|h| h.child_text("GLOSA"))
        .unwrap_or_default();
    Err(ClientError::Authentication(format!(
        "{}: status {:?} {}",
        operation,
        estado,
        glosa.trim()
    )))
}
