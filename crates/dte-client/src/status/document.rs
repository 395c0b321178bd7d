//! Document validation statuses (`getEstDte`, `getEstDteAv`)

use dte_core::XmlDocument;

use super::codes::{header_status, taxonomy};
use super::{RemoteStatus, StatusKind};
use crate::error::{ClientError, Result};

taxonomy! {
    /// Result of validating a single issued document
    pub enum DocumentCode {
        Ok = "DOK" => "document received, data matches", error: false, terminal: true;
        NotReceived = "DNK" => "document received, data does not match", error: true, terminal: true;
        NotFound = "FAU" => "document not received", error: true, terminal: true;
        NotAuthorized = "FNA" => "document not authorized", error: true, terminal: true;
        Cancelled = "FAN" => "document cancelled", error: true, terminal: true;
        NotIssuer = "EMP" => "company not authorized as issuer", error: true, terminal: true;
        TotalAmountDiffers = "TMD" => "document received, total amount differs by credit notes", error: false, terminal: true;
        TotalAmountCancelled = "TMC" => "document received, total amount cancelled by credit notes", error: false, terminal: true;
        AmountModified = "MMD" => "document received, amount modified by debit notes", error: false, terminal: true;
        AmountModifiedCancelled = "MMC" => "document received, amount modified and cancelled by notes", error: false, terminal: true;
        CancelledByNote = "AND" => "document cancelled by credit note", error: true, terminal: true;
        CancelledByNoteCorrection = "ANC" => "document cancelled by correcting note", error: true, terminal: true;
    }
}

taxonomy! {
    /// Result of validating a document together with its signature
    pub enum DocumentSignatureCode {
        Ok = "DOK" => "document received, data and signature match", error: false, terminal: true;
        NotReceived = "DNK" => "document received, data or signature do not match", error: true, terminal: true;
        NotFound = "FAU" => "document not received", error: true, terminal: true;
        NotAuthorized = "FNA" => "document not authorized", error: true, terminal: true;
        Cancelled = "FAN" => "document cancelled", error: true, terminal: true;
        NotIssuer = "EMP" => "company not authorized as issuer", error: true, terminal: true;
        TotalAmountDiffers = "TMD" => "signature valid, total amount differs by credit notes", error: false, terminal: true;
        TotalAmountCancelled = "TMC" => "signature valid, total amount cancelled by credit notes", error: false, terminal: true;
        AmountModified = "MMD" => "signature valid, amount modified by debit notes", error: false, terminal: true;
        AmountModifiedCancelled = "MMC" => "signature valid, amount modified and cancelled by notes", error: false, terminal: true;
        CancelledByNote = "AND" => "document cancelled by credit note", error: true, terminal: true;
        CancelledByNoteCorrection = "ANC" => "document cancelled by correcting note", error: true, terminal: true;
    }
}

/// Parse a `getEstDte` payload, or a `getEstDteAv` one when `with_signature`
pub fn parse_document_status(xml: &str, with_signature: bool) -> Result<RemoteStatus> {
    let operation = if with_signature { "getEstDteAv" } else { "getEstDte" };
    let document = XmlDocument::parse(xml.trim())
        .map_err(|e| ClientError::MalformedResponse(format!("{}: {}", operation, e)))?;
    let header = document.root.find("RESP_HDR").ok_or_else(|| {
        ClientError::MalformedResponse(format!("{}: missing RESP_HDR", operation))
    })?;
    let code = header_status(header);

    let kind = if with_signature {
        StatusKind::DocumentSignature(DocumentSignatureCode::from_code(&code, Some(header)))
    } else {
        StatusKind::Document(DocumentCode::from_code(&code, Some(header)))
    };
    let mut status = RemoteStatus::new(kind);

    let glosa = header
        .child_text("GLOSA_ESTADO")
        .or_else(|| header.child_text("GLOSA"))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let detail = header
        .child_text("GLOSA_ERR")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    status.remote_message = match (glosa, detail) {
        (Some(glosa), Some(detail)) => Some(format!("{}: {}", glosa, detail)),
        (glosa, detail) => glosa.or(detail),
    };
    Ok(status)
}
