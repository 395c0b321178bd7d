//! Response status taxonomy
//!
//! Every remote operation answers with its own closed code set. Each set
//! maps a code to a description and an error flag; [`RemoteStatus`] is the
//! common shape callers act on.

pub mod codes;
pub mod document;
pub mod email;
pub mod upload;

use std::fmt;

pub use codes::{CompositeError, ServiceError, COMPOSITE_ERROR_CODE};
pub use document::{parse_document_status, DocumentCode, DocumentSignatureCode};
pub use email::{parse_email_status, EmailRequestCode};
pub use upload::{parse_receipt, parse_submission_status, ReceiptStatus, SubmissionCode, UploadReceipt};

/// Code of the operation-specific taxonomy a status belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    Receipt(ReceiptStatus),
    Submission(SubmissionCode),
    Document(DocumentCode),
    DocumentSignature(DocumentSignatureCode),
    EmailRequest(EmailRequestCode),
}

impl StatusKind {
    pub fn code(&self) -> String {
        match self {
            StatusKind::Receipt(c) => c.code(),
            StatusKind::Submission(c) => c.code(),
            StatusKind::Document(c) => c.code(),
            StatusKind::DocumentSignature(c) => c.code(),
            StatusKind::EmailRequest(c) => c.code(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            StatusKind::Receipt(c) => c.description(),
            StatusKind::Submission(c) => c.description(),
            StatusKind::Document(c) => c.description(),
            StatusKind::DocumentSignature(c) => c.description(),
            StatusKind::EmailRequest(c) => c.description(),
        }
    }

    pub fn is_error(&self) -> bool {
        match self {
            StatusKind::Receipt(c) => c.is_error(),
            StatusKind::Submission(c) => c.is_error(),
            StatusKind::Document(c) => c.is_error(),
            StatusKind::DocumentSignature(c) => c.is_error(),
            StatusKind::EmailRequest(c) => c.is_error(),
        }
    }

    /// Whether re-polling can still change the answer
    pub fn is_terminal(&self) -> bool {
        match self {
            StatusKind::Receipt(_) => true,
            StatusKind::Submission(c) => c.is_terminal(),
            StatusKind::Document(c) => c.is_terminal(),
            StatusKind::DocumentSignature(c) => c.is_terminal(),
            StatusKind::EmailRequest(c) => c.is_terminal(),
        }
    }

    /// Negative service error, if that is what the remote answered
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            StatusKind::Submission(SubmissionCode::Service(e))
            | StatusKind::Document(DocumentCode::Service(e))
            | StatusKind::DocumentSignature(DocumentSignatureCode::Service(e))
            | StatusKind::EmailRequest(EmailRequestCode::Service(e)) => Some(e),
            _ => None,
        }
    }
}

/// Document counts for one document type in a submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentCounts {
    /// `None` for the aggregate
    pub document_type: Option<u16>,
    pub reported: u32,
    pub accepted: u32,
    pub rejected: u32,
    /// Accepted with objections
    pub flagged: u32,
}

/// Human status derived from the code and the counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub code: String,
    pub description: String,
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code, self.description)
    }
}

/// Normalized answer of any remote status operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    pub kind: StatusKind,
    pub code: String,
    pub description: String,
    pub is_error: bool,
    /// Free text from the remote (`GLOSA`), if any
    pub remote_message: Option<String>,
    pub track_id: Option<String>,
    pub counts: Vec<DocumentCounts>,
}

impl RemoteStatus {
    pub fn new(kind: StatusKind) -> Self {
        Self {
            code: kind.code(),
            description: kind.description(),
            is_error: kind.is_error(),
            kind,
            remote_message: None,
            track_id: None,
            counts: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Counts summed over all document types
    pub fn totals(&self) -> DocumentCounts {
        self.counts
            .iter()
            .fold(DocumentCounts::default(), |acc, c| DocumentCounts {
                document_type: None,
                reported: acc.reported.saturating_add(c.reported),
                accepted: acc.accepted.saturating_add(c.accepted),
                rejected: acc.rejected.saturating_add(c.rejected),
                flagged: acc.flagged.saturating_add(c.flagged),
            })
    }

    /// Composite status
    ///
    /// Any rejected document yields `RCH`, otherwise any flagged one yields
    /// `RLV`, regardless of the raw code. Without counts the raw code stands.
    pub fn summary(&self) -> StatusSummary {
        let totals = self.totals();
        let code = if totals.rejected > 0 {
            SubmissionCode::Rejected
        } else if totals.flagged > 0 {
            SubmissionCode::AcceptedWithMinorObjections
        } else {
            return StatusSummary {
                code: self.code.clone(),
                description: self.description.clone(),
            };
        };
        StatusSummary {
            code: code.code(),
            description: code.description(),
        }
    }
}
