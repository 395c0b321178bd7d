//! DTE Client - talks to the tax authority's web services
//!
//! Authentication by seed/token exchange, document upload and the status
//! queries, over a pluggable [`Transport`]. Transport failures are retried
//! with linear backoff; well-formed answers, errors included, come back as
//! a normalized [`RemoteStatus`].

pub mod client;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod retry;
pub mod soap;
pub mod spool;
pub mod status;
pub mod submission;
pub mod token;
pub mod transport;

pub use client::{DocumentQuery, DteClient};
pub use config::{ClientConfig, Environment};
pub use error::{ClientError, Result};
pub use retry::{RetryPolicy, DEFAULT_BACKOFF_STEP, DEFAULT_MAX_RETRIES, MAX_RETRIES_CEILING};
pub use status::{
    DocumentCode, DocumentCounts, DocumentSignatureCode, EmailRequestCode, ReceiptStatus,
    RemoteStatus, StatusKind, StatusSummary, SubmissionCode,
};
pub use submission::{SubmissionRecord, SubmissionState};
pub use token::{CachedToken, FileTokenCache, MemoryTokenCache, TokenCache};
pub use transport::{HttpTransport, Transport, UploadRequest};
